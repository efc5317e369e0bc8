//! Mounted and exposed (`spec.md` §4.6's `Active`).
//!
//! Grounded on `original_source/src/state/active_state.hpp`: the ctor fires
//! `machine.notify()` unconditionally on entry, and every exit carries the
//! triggering event into `Deactivating` except a caller-initiated `Unmount`,
//! which arms a fresh notification timer first.

use crate::error::MediaError;
use crate::events::Event;
use crate::slot::SlotMachine;

use super::deactivating::Deactivating;
use super::{SlotState, StepResult};

pub fn on_enter(machine: &mut SlotMachine) -> Option<SlotState> {
    machine.notifier.notify(0);
    None
}

pub fn handle(machine: &mut SlotMachine, event: Event) -> StepResult {
    match event {
        Event::Unmount => {
            machine.notifier.start(machine.config.timeout);
            StepResult::to(
                SlotState::Deactivating(Deactivating::starting_fresh()),
                Ok(true),
            )
        }
        Event::SubprocessStopped { exit_code } => {
            machine.exit_code = exit_code;
            StepResult::accepted(SlotState::Deactivating(Deactivating::starting_with(
                Event::SubprocessStopped { exit_code },
            )))
        }
        Event::UdevChange { state } => StepResult::accepted(SlotState::Deactivating(
            Deactivating::starting_with(Event::UdevChange { state }),
        )),
        Event::Mount { .. } => StepResult::to(SlotState::Active, Err(MediaError::NotPermitted)),
        Event::RegisterDbus => {
            log::debug!("slot {}: ignoring RegisterDbus while Active", machine.name);
            StepResult::accepted(SlotState::Active)
        }
    }
}
