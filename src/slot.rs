//! A single virtual-media slot: configuration, owned resources, and the
//! state machine that drives them (`spec.md` §4.6, §5).
//!
//! Grounded on `original_source/src/state_machine.hpp`'s `MountPointStateMachine`
//! struct, which plays the same role: a plain struct holding `name`,
//! `config`, `target`, `state`, `exitCode`, and the io_context, with
//! `changeState`/`emitEvent` as its only behavior (the actual transition
//! logic lives in the `BasicState` hierarchy — here, the `state` module).

use std::path::PathBuf;
use std::rc::Rc;

use tokio::sync::mpsc;

use crate::config::SlotConfig;
use crate::dbus_iface::SharedStatus;
use crate::events::{Event, EventEnvelope, EventSender, MountTarget};
use crate::notify::{CompletionSink, Notifier};
use crate::resources::gadget::Gadget;
use crate::resources::process::Process;
use crate::state::SlotState;
use crate::udev_monitor::UdevMonitor;

/// Owns everything a slot's state transitions read or mutate. Lives on the
/// single-threaded executor (`spec.md` §5); nothing here is `Send`.
pub struct SlotMachine {
    pub name: String,
    pub config: SlotConfig,
    pub gadget_prefix: PathBuf,
    pub bus_prefix: PathBuf,
    pub exit_code: i32,
    pub target: Option<MountTarget>,
    pub process: Option<Process>,
    pub gadget: Option<Gadget>,
    pub notifier: Notifier,
    pub events: EventSender,
    pub status: SharedStatus,
    udev_monitor: Rc<std::cell::RefCell<UdevMonitor>>,
}

impl SlotMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SlotConfig,
        gadget_prefix: PathBuf,
        bus_prefix: PathBuf,
        events: EventSender,
        udev_monitor: Rc<std::cell::RefCell<UdevMonitor>>,
        completion_sink: Rc<dyn CompletionSink>,
        status: SharedStatus,
    ) -> Self {
        let name = config.name.clone();
        SlotMachine {
            notifier: Notifier::new(name.clone(), completion_sink),
            name,
            config,
            gadget_prefix,
            bus_prefix,
            exit_code: -1,
            target: None,
            process: None,
            gadget: None,
            events,
            status,
            udev_monitor,
        }
    }

    pub fn register_with_udev_monitor(&self) {
        self.udev_monitor
            .borrow_mut()
            .register(self.config.nbd_device.clone(), self.events.clone());
    }

    /// Mirrors the machine's current lifecycle state into the D-Bus property
    /// snapshot (`spec.md` §6), so `active`/`exit_code`/`image_url`/
    /// `write_protected` reflect the slot's actual state instead of the
    /// pre-activation defaults `dbus_iface::initial_status` seeded.
    fn refresh_status(&self, active: bool) {
        let mut status = self.status.borrow_mut();
        status.active = active;
        status.exit_code = self.exit_code;
        match &self.target {
            Some(target) => {
                status.image_url = target.image_url.clone();
                status.write_protected = !target.rw;
            }
            None => {
                status.image_url.clear();
                status.write_protected = true;
            }
        }
    }
}

/// The event loop + owned state for one slot. Events arrive serially on
/// `receiver` (`spec.md` §5's per-slot ordering guarantee falls out of the
/// channel's FIFO discipline); a state's `on_enter` is chased to a fixed
/// point before the next event is taken, and no event is handled while an
/// `on_enter` is in flight (`spec.md` §4.6's invariant — trivially true here
/// since both run on the one executor thread with no `.await` suspension
/// points inside `on_enter`/`handle` other than the ones that legitimately
/// spawn detached follow-up tasks).
pub struct Slot {
    machine: SlotMachine,
    state: SlotState,
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl Slot {
    pub fn new(machine: SlotMachine, receiver: mpsc::UnboundedReceiver<EventEnvelope>) -> Self {
        Slot {
            machine,
            state: SlotState::Initial,
            receiver,
        }
    }

    /// Chases `on_enter` to its fixed point. Refreshes the status snapshot
    /// after every intermediate state *and* once more at the end, since the
    /// final state's `on_enter` call (e.g. `Ready`'s, which clears `target`)
    /// still runs even when it returns `None` on the first try.
    fn drive_to_fixed_point(&mut self) {
        while let Some(next) = self.state.on_enter(&mut self.machine) {
            log::debug!(
                "slot {}: {} -> {} (on_enter)",
                self.machine.name,
                self.state.name(),
                next.name()
            );
            self.state = next;
            self.refresh_status();
        }
        self.refresh_status();
    }

    fn refresh_status(&self) {
        self.machine
            .refresh_status(matches!(self.state, SlotState::Active));
    }

    pub async fn run(mut self) {
        self.drive_to_fixed_point();

        while let Some(envelope) = self.receiver.recv().await {
            let EventEnvelope { event, reply } = envelope;
            log::info!(
                "slot {}: received {} while {}",
                self.machine.name,
                event.name(),
                self.state.name()
            );

            let result = self.state.handle(&mut self.machine, event);

            if let Some(reply) = reply {
                let _ = reply.send(result.reply);
            }

            self.state = result.next;
            self.drive_to_fixed_point();
        }
    }
}
