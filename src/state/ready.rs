//! Idle state (`spec.md` §4.6's `Ready`).
//!
//! Grounded on `original_source/src/state/ready_state.hpp`'s two
//! constructors: plain (success) and the `(ec, message)` overload used when
//! arriving from a failed `Activating`/`Deactivating` attempt. Both resolve
//! any outstanding notification on entry; this crate carries the same choice
//! as a `pending: Option<NotifyResult>` payload on the `Ready` variant
//! instead of two constructors.

use crate::error::MediaError;
use crate::events::Event;
use crate::slot::SlotMachine;

use super::{NotifyResult, SlotState, StepResult};

pub fn on_enter(machine: &mut SlotMachine, pending: Option<NotifyResult>) -> Option<SlotState> {
    // Drops whatever the last cycle's `MountTarget` was still holding (a
    // `Mount`/`SecretFile`), so backend resources don't outlive the
    // activation they belong to.
    machine.target = None;

    match pending {
        Some(Ok(())) => machine.notifier.notify(0),
        Some(Err(errno)) => machine.notifier.notify(errno),
        None => {}
    }
    None
}

pub fn handle(machine: &mut SlotMachine, event: Event) -> StepResult {
    match event {
        Event::Mount { target } => {
            machine.target = target;
            machine.notifier.start(machine.config.timeout);
            StepResult::to(SlotState::Activating, Ok(true))
        }
        Event::Unmount => {
            StepResult::to(SlotState::Ready { pending: None }, Err(MediaError::NotPermitted))
        }
        Event::SubprocessStopped { .. } | Event::UdevChange { .. } | Event::RegisterDbus => {
            log::debug!(
                "slot {}: ignoring {} while Ready",
                machine.name,
                event.name()
            );
            StepResult::accepted(SlotState::Ready { pending: None })
        }
    }
}
