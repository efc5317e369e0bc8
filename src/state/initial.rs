//! Pre-registration state (`spec.md` §4.6's `Initial`).
//!
//! Grounded on `original_source/src/state/initial_state.hpp`'s
//! `handleEvent(RegisterDBusEvent)`, which registers the object server
//! interfaces and constructs the udev monitor's device entry.

use crate::error::MediaError;
use crate::events::Event;
use crate::slot::SlotMachine;

use super::{SlotState, StepResult};

pub fn on_enter(_machine: &mut SlotMachine) -> Option<SlotState> {
    None
}

pub fn handle(machine: &mut SlotMachine, event: Event) -> StepResult {
    match event {
        Event::RegisterDbus => {
            machine.register_with_udev_monitor();
            StepResult::to(SlotState::Ready { pending: None }, Ok(true))
        }
        other => {
            log::info!(
                "slot {}: ignoring {} while Initial",
                machine.name,
                other.name()
            );
            StepResult::to(SlotState::Initial, Err(MediaError::NotPermitted))
        }
    }
}
