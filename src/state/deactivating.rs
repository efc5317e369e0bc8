//! Teardown in progress (`spec.md` §4.6's `Deactivating`).
//!
//! Grounded on `original_source/src/state/deactivating_state.hpp`: two entry
//! shapes (carrying an initiating udev/subprocess event, or none for a plain
//! `Unmount`), an `onEnter` that drops `gadget` and `process` unconditionally,
//! and an `evaluate()` that only leaves once both signals have arrived.

use crate::error::MediaError;
use crate::events::{DeviceState, Event};
use crate::slot::SlotMachine;

use super::{SlotState, StepResult};

/// Which of the two signals this deactivation cycle is still waiting on.
#[derive(Debug, Default)]
pub struct Deactivating {
    udev_observed: Option<DeviceState>,
    subprocess_observed: bool,
}

impl Deactivating {
    /// Entered from `Active`/`Activating` on `Unmount`: nothing observed yet.
    pub fn starting_fresh() -> Self {
        Deactivating::default()
    }

    /// Entered carrying the event that triggered the transition (a
    /// `UdevChange` or `SubprocessStopped` observed while `Active` or
    /// `Activating`), pre-recording it.
    pub fn starting_with(event: Event) -> Self {
        let mut data = Deactivating::default();
        data.apply(&event);
        data
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::UdevChange { state } => self.udev_observed = Some(*state),
            Event::SubprocessStopped { .. } => self.subprocess_observed = true,
            _ => {}
        }
    }

    fn evaluate(&self) -> Option<SlotState> {
        if self.udev_observed.is_none() || !self.subprocess_observed {
            return None;
        }
        let pending = if self.udev_observed == Some(DeviceState::Removed) {
            Ok(())
        } else {
            Err(libc::ECONNREFUSED)
        };
        Some(SlotState::Ready {
            pending: Some(pending),
        })
    }
}

pub fn on_enter(machine: &mut SlotMachine, data: &mut Deactivating) -> Option<SlotState> {
    // Gadget's Drop issues configfs teardown synchronously, and escalates to
    // `UdevChange(Unknown)` on failure on its own.
    machine.gadget = None;

    // Process::stop() runs SIGTERM/SIGKILL asynchronously; its exit watcher
    // (armed at spawn time) posts `SubprocessStopped` once the kernel
    // reports the child gone.
    if let Some(mut process) = machine.process.take() {
        tokio::task::spawn_local(async move {
            process.stop().await;
        });
    }

    data.evaluate()
}

pub fn handle(machine: &mut SlotMachine, mut data: Deactivating, event: Event) -> StepResult {
    match event {
        Event::UdevChange { state } => {
            data.udev_observed = Some(state);
            StepResult::accepted(data.evaluate().unwrap_or(SlotState::Deactivating(data)))
        }
        Event::SubprocessStopped { exit_code } => {
            machine.exit_code = exit_code;
            data.subprocess_observed = true;
            StepResult::accepted(data.evaluate().unwrap_or(SlotState::Deactivating(data)))
        }
        Event::RegisterDbus | Event::Mount { .. } | Event::Unmount => StepResult::to(
            SlotState::Deactivating(data),
            Err(MediaError::ResourceBusy),
        ),
    }
}
