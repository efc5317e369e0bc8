//! The request surface exposed per slot (`spec.md` §6).
//!
//! Grounded on the corpus's two D-Bus examples (`udisks-rs/src/block.rs`,
//! `systemd_manager.rs`), both built on the `zbus` family; those are client
//! proxies, so the server-side `#[zbus::interface]` shape here is this
//! crate's own construction from the same crate. Object paths follow
//! `original_source/src/configuration.hpp`'s `ProxyMountPoints`/
//! `StandardMountPoints` split, realized as `<mode>` in the path.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use zbus::{interface, zvariant, SignalContext};

use crate::config::Mode;
use crate::error::MediaError;
use crate::events::{Event, EventEnvelope, EventSender, MountTarget};
use crate::notify::CompletionSink;
use crate::resources::credentials::Credentials;

/// Read-only status mirrored out of a slot's state machine after every
/// transition, so the D-Bus property getters (which run as separate zbus
/// dispatch tasks on the same executor) never need to reach into the
/// machine directly.
#[derive(Debug, Clone)]
pub struct SlotStatus {
    pub active: bool,
    pub exit_code: i32,
    pub device: String,
    pub endpoint_id: String,
    pub socket: String,
    pub image_url: String,
    pub write_protected: bool,
    pub timeout_secs: u64,
}

pub type SharedStatus = Rc<RefCell<SlotStatus>>;

/// Sends a `Completion` signal through a handle to the registered D-Bus
/// object. `zbus::interface`-generated signal functions need a
/// [`SignalContext`] bound to the connection and object path, obtained once
/// at registration and stashed here.
pub struct DbusCompletionSink {
    emitter: RefCell<Option<SignalContext<'static>>>,
}

impl DbusCompletionSink {
    pub fn new() -> Rc<Self> {
        Rc::new(DbusCompletionSink {
            emitter: RefCell::new(None),
        })
    }

    pub fn bind(&self, emitter: SignalContext<'static>) {
        *self.emitter.borrow_mut() = Some(emitter);
    }
}

impl CompletionSink for DbusCompletionSink {
    fn emit(&self, errno: i32) {
        let Some(emitter) = self.emitter.borrow().clone() else {
            log::warn!("Completion({errno}) dropped: object not yet registered");
            return;
        };
        tokio::task::spawn_local(async move {
            if let Err(e) = VirtualMediaInterface::completion(&emitter, errno).await {
                log::warn!("failed to emit Completion signal: {e}");
            }
        });
    }
}

/// The `xyz.openbmc_project.VirtualMedia.MountPoint`-equivalent interface
/// (`spec.md` §6's method/property table).
pub struct VirtualMediaInterface {
    pub mode: Mode,
    pub events: EventSender,
    pub status: SharedStatus,
}

#[interface(name = "xyz.openbmc_project.VirtualMedia.MountPoint")]
impl VirtualMediaInterface {
    /// Proxy mode takes no arguments; Standard mode takes the target and an
    /// optional credentials pipe fd (`spec.md` §6's credential-FD handling).
    async fn mount(
        &self,
        image_url: Option<String>,
        rw: Option<bool>,
        creds_fd: Option<zvariant::OwnedFd>,
    ) -> zbus::fdo::Result<bool> {
        let target = match self.mode {
            Mode::Proxy => None,
            Mode::Standard => {
                let image_url = image_url.ok_or_else(|| {
                    zbus::fdo::Error::InvalidArgs("image_url is required in Standard mode".into())
                })?;
                let credentials = match creds_fd {
                    Some(fd) => Some(read_credentials(fd).map_err(to_fdo_error)?),
                    None => None,
                };
                Some(MountTarget {
                    image_url,
                    rw: rw.unwrap_or(false),
                    credentials,
                    mount: None,
                    secret: None,
                })
            }
        };

        self.dispatch(Event::Mount { target }).await
    }

    async fn unmount(&self) -> zbus::fdo::Result<bool> {
        self.dispatch(Event::Unmount).await
    }

    #[zbus(signal)]
    async fn completion(emitter: &SignalContext<'_>, status: i32) -> zbus::Result<()>;

    #[zbus(property)]
    async fn active(&self) -> bool {
        self.status.borrow().active
    }

    #[zbus(property)]
    async fn exit_code(&self) -> i32 {
        self.status.borrow().exit_code
    }

    #[zbus(property)]
    async fn device(&self) -> String {
        self.status.borrow().device.clone()
    }

    #[zbus(property)]
    async fn endpoint_id(&self) -> String {
        self.status.borrow().endpoint_id.clone()
    }

    #[zbus(property)]
    async fn socket(&self) -> String {
        self.status.borrow().socket.clone()
    }

    #[zbus(property, name = "ImageURL")]
    async fn image_url(&self) -> String {
        self.status.borrow().image_url.clone()
    }

    #[zbus(property)]
    async fn write_protected(&self) -> bool {
        self.status.borrow().write_protected
    }

    #[zbus(property)]
    async fn timeout(&self) -> u64 {
        self.status.borrow().timeout_secs
    }
}

impl VirtualMediaInterface {
    async fn dispatch(&self, event: Event) -> zbus::fdo::Result<bool> {
        let (envelope, reply) = EventEnvelope::requested(event);
        self.events
            .send(envelope)
            .map_err(|_| zbus::fdo::Error::Failed("slot no longer running".into()))?;
        match reply.await {
            Ok(Ok(accepted)) => Ok(accepted),
            Ok(Err(e)) => Err(to_fdo_error(e)),
            Err(_) => Err(zbus::fdo::Error::Failed("slot dropped the request".into())),
        }
    }
}

fn to_fdo_error(e: MediaError) -> zbus::fdo::Error {
    match e {
        MediaError::NotPermitted => zbus::fdo::Error::NotSupported(e.to_string()),
        MediaError::ResourceBusy => zbus::fdo::Error::Failed(e.to_string()),
        MediaError::InvalidArgument(_) => zbus::fdo::Error::InvalidArgs(e.to_string()),
        MediaError::OperationNotSupported => zbus::fdo::Error::NotSupported(e.to_string()),
        MediaError::ConnectionRefused(_) => zbus::fdo::Error::Failed(e.to_string()),
    }
}

/// Reads up to a small fixed limit off the credentials fd and parses the
/// `user\0password\0` wire format (`spec.md` §6). The raw buffer is zeroed
/// before returning, whether or not parsing succeeded, so no copy of the
/// password survives past this call other than the one `Credentials` owns.
fn read_credentials(fd: zvariant::OwnedFd) -> Result<Credentials, MediaError> {
    use std::io::Read;
    use std::os::fd::{FromRawFd, IntoRawFd};

    const MAX_CREDENTIALS_LEN: usize = 256;

    let raw = fd.into_raw_fd();
    let mut file = unsafe { std::fs::File::from_raw_fd(raw) };
    let mut buf = vec![0u8; MAX_CREDENTIALS_LEN];
    let read = file.read(&mut buf).map_err(|e| MediaError::InvalidArgument(format!("reading credentials: {e}")));

    let result = read.and_then(|n| {
        Credentials::parse(&buf[..n])
            .ok_or_else(|| MediaError::InvalidArgument("malformed credentials".into()))
    });

    for byte in buf.iter_mut() {
        // SAFETY: plain zeroing; volatile write prevents the optimizer from
        // eliding it as a dead store right before `buf` is dropped.
        unsafe { std::ptr::write_volatile(byte, 0) };
    }

    result
}

pub fn object_path(mode: Mode, name: &str) -> String {
    let mode = match mode {
        Mode::Proxy => "Proxy",
        Mode::Standard => "Standard",
    };
    format!("/xyz/openbmc_project/VirtualMedia/{mode}/{name}")
}

/// Derives the initial (pre-activation) status snapshot for a slot from its
/// static configuration.
pub fn initial_status(config: &crate::config::SlotConfig) -> SlotStatus {
    SlotStatus {
        active: false,
        exit_code: -1,
        device: config
            .nbd_device
            .name()
            .map(str::to_string)
            .unwrap_or_default(),
        endpoint_id: config.endpoint_id.clone().unwrap_or_default(),
        socket: config.unix_socket.display().to_string(),
        image_url: String::new(),
        write_protected: true,
        timeout_secs: config.timeout.as_secs(),
    }
}

/// `Duration` rounding helper shared by the registry when it seeds
/// `SlotStatus::timeout_secs` at startup (kept here since it's purely a
/// D-Bus-facing presentation detail).
pub fn timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs()
}
