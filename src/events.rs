//! Events delivered to a per-slot state machine (`spec.md` §4.6).
//!
//! Grounded on `original_source/src/events.hpp`'s `Event` variant set,
//! translated from a `std::variant` of event structs into a plain Rust enum
//! dispatched by `match` (design notes: "prefer sum-type dispatch").

use tokio::sync::{mpsc, oneshot};

use crate::error::MediaError;
use crate::resources::credentials::Credentials;
use crate::resources::mount::MountBackend;
use crate::resources::secret::SecretFile;

/// The kernel's last-observed view of an NBD device, from the udev monitor
/// (`spec.md` §3's device-monitor table and §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    NotMonitored,
    Removed,
    Inserted,
    Unknown,
}

/// A mount attempt's target, supplied with a `Mount` request in Standard mode.
///
/// `credentials` arrives with the request (read off the caller's creds FD by
/// the request surface); `mount` and `secret` start as `None` and are filled
/// in by `Activating::on_enter` once the backend is selected from
/// `image_url`'s scheme.
#[derive(Debug)]
pub struct MountTarget {
    pub image_url: String,
    pub rw: bool,
    pub credentials: Option<Credentials>,
    pub mount: Option<MountBackend>,
    pub secret: Option<SecretFile>,
}

#[derive(Debug)]
pub enum Event {
    RegisterDbus,
    Mount { target: Option<MountTarget> },
    Unmount,
    SubprocessStopped { exit_code: i32 },
    UdevChange { state: DeviceState },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::RegisterDbus => "RegisterDbus",
            Event::Mount { .. } => "Mount",
            Event::Unmount => "Unmount",
            Event::SubprocessStopped { .. } => "SubprocessStopped",
            Event::UdevChange { .. } => "UdevChange",
        }
    }
}

/// Reply to a request-surface caller: `Ok(true)` if accepted, `Err` with the
/// errno-equivalent otherwise (`spec.md` §6's method table). Internal events
/// the machine synthesizes for itself (`SubprocessStopped`, `UdevChange`)
/// carry no reply channel.
pub type EventReply = oneshot::Sender<Result<bool, MediaError>>;

/// An event together with an optional reply channel, queued onto a slot's
/// single mpsc channel so that "events are processed serially per slot"
/// (`spec.md` §5) falls out of the channel's FIFO ordering rather than
/// needing a separate lock.
#[derive(Debug)]
pub struct EventEnvelope {
    pub event: Event,
    pub reply: Option<EventReply>,
}

impl EventEnvelope {
    pub fn internal(event: Event) -> Self {
        EventEnvelope { event, reply: None }
    }

    pub fn requested(event: Event) -> (Self, oneshot::Receiver<Result<bool, MediaError>>) {
        let (tx, rx) = oneshot::channel();
        (
            EventEnvelope {
                event,
                reply: Some(tx),
            },
            rx,
        )
    }
}

pub type EventSender = mpsc::UnboundedSender<EventEnvelope>;
