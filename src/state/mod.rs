//! The per-slot state machine (`spec.md` §4.6, the core of this crate).
//!
//! Grounded on `original_source/src/state/basic_state.hpp`'s `BasicStateT<T>`
//! CRTP dispatch, re-expressed as a closed `enum` matched on rather than a
//! virtual-dispatch hierarchy — the design notes prefer sum-type dispatch
//! where the state set is fixed and known in full, which it is here (exactly
//! five states, `spec.md` §4.6's diagram).

pub mod active;
pub mod activating;
pub mod deactivating;
pub mod initial;
pub mod ready;

use crate::error::MediaError;
use crate::events::Event;
use crate::slot::SlotMachine;

/// What a `Ready`/`Deactivating` entry resolves a pending notification with:
/// `Ok(())` fires `Completion(0)`, `Err(errno)` fires `Completion(errno)`.
pub type NotifyResult = Result<(), i32>;

/// The five states of `spec.md` §4.6's diagram. Each carries exactly the
/// data that state needs beyond what's already on [`SlotMachine`] (target,
/// process, gadget, exit code) — e.g. `Deactivating` additionally tracks
/// which of the two expected signals have arrived.
#[derive(Debug)]
pub enum SlotState {
    Initial,
    Ready { pending: Option<NotifyResult> },
    Activating,
    Active,
    Deactivating(deactivating::Deactivating),
}

impl SlotState {
    pub fn name(&self) -> &'static str {
        match self {
            SlotState::Initial => "Initial",
            SlotState::Ready { .. } => "Ready",
            SlotState::Activating => "Activating",
            SlotState::Active => "Active",
            SlotState::Deactivating(_) => "Deactivating",
        }
    }

    /// Runs this state's `on_enter`, returning a follow-on transition if the
    /// state synthesises one immediately (`spec.md` §4.6's "tail call").
    pub fn on_enter(&mut self, machine: &mut SlotMachine) -> Option<SlotState> {
        match self {
            SlotState::Initial => initial::on_enter(machine),
            SlotState::Ready { pending } => ready::on_enter(machine, pending.take()),
            SlotState::Activating => activating::on_enter(machine),
            SlotState::Active => active::on_enter(machine),
            SlotState::Deactivating(data) => deactivating::on_enter(machine, data),
        }
    }

    /// Dispatches `event` to this state's handler.
    pub fn handle(self, machine: &mut SlotMachine, event: Event) -> StepResult {
        match self {
            SlotState::Initial => initial::handle(machine, event),
            SlotState::Ready { .. } => ready::handle(machine, event),
            SlotState::Activating => activating::handle(machine, event),
            SlotState::Active => active::handle(machine, event),
            SlotState::Deactivating(data) => deactivating::handle(machine, data, event),
        }
    }
}

/// The result of handling one event: the state to install next (which may
/// be the same variant reconstructed, since `handle` consumes the old one
/// by value) and the reply to send back to the caller if the event carried
/// one. Internal events (`SubprocessStopped`, `UdevChange`) carry no reply
/// channel, so the `reply` field is simply unused for them by the
/// dispatcher.
pub struct StepResult {
    pub next: SlotState,
    pub reply: Result<bool, MediaError>,
}

impl StepResult {
    pub fn to(next: SlotState, reply: Result<bool, MediaError>) -> Self {
        StepResult { next, reply }
    }

    /// For internal events (no caller waiting); the reply is accepted but
    /// never looked at by the dispatcher.
    pub fn accepted(next: SlotState) -> Self {
        StepResult {
            next,
            reply: Ok(true),
        }
    }
}
