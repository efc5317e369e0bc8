//! Per-slot completion notifier (`spec.md` §4.6's "notify"/"notificationStart",
//! §5's "notification wrapper").
//!
//! Grounded on `original_source/src/utils/impl/dbus_notify_wrapper.hpp`'s
//! `DbusNotificationWrapper`: a mount cycle arms the notifier when it begins
//! (`start`), and exactly one of "success", "failure", or "timeout" resolves
//! it. `notify` before arming is suppressed (logged, not an error) — a state
//! can call it unconditionally without checking whether a cycle is in
//! progress.
//!
//! `SPEC_FULL.md` Open Question: a second `start()` call while already armed
//! cancels the outstanding timer before re-arming, rather than leaving two
//! timers racing to flip `started` back to `false`.

use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Where a resolved notification goes: the `Completion` signal on the slot's
/// D-Bus object (`spec.md` §6). Kept as a trait so this module doesn't need
/// to know about `zbus`.
pub trait CompletionSink {
    fn emit(&self, errno: i32);
}

/// Arms on `start`, resolves at most once per arming via `notify`, and
/// silently disarms on its own if nothing calls `notify` before the timeout
/// elapses (`spec.md` §5: "timer expiration does not cancel the transition
/// itself, only the caller's wait").
pub struct Notifier {
    slot: String,
    sink: Rc<dyn CompletionSink>,
    started: bool,
    timer: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn new(slot: impl Into<String>, sink: Rc<dyn CompletionSink>) -> Self {
        Notifier {
            slot: slot.into(),
            sink,
            started: false,
            timer: None,
        }
    }

    /// Arms the notifier for one mount cycle, bounding how long a caller may
    /// wait for `notify` with `timeout`. A still-armed previous cycle is
    /// disarmed first.
    pub fn start(&mut self, timeout: Duration) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.started = true;
        let slot = self.slot.clone();
        self.timer = Some(tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            log::debug!("slot {slot}: notification wait timed out, caller stopped waiting");
        }));
    }

    /// Resolves the current cycle with `errno` (`0` for success), emitting
    /// the `Completion` signal. A no-op (logged) if nothing is armed.
    pub fn notify(&mut self, errno: i32) {
        if !self.started {
            log::debug!("slot {}: notify({errno}) suppressed, not started", self.slot);
            return;
        }
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.started = false;
        self.sink.emit(errno);
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Vec<i32>>>);

    impl CompletionSink for RecordingSink {
        fn emit(&self, errno: i32) {
            self.0.borrow_mut().push(errno);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn notify_before_start_is_suppressed() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let sink = RecordingSink::default();
                let mut notifier = Notifier::new("Slot_0", Rc::new(sink.clone()) as Rc<dyn CompletionSink>);
                notifier.notify(0);
                assert!(sink.0.borrow().is_empty());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_then_notify_resolves_once() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let sink = RecordingSink::default();
                let mut notifier = Notifier::new("Slot_0", Rc::new(sink.clone()) as Rc<dyn CompletionSink>);
                notifier.start(Duration::from_secs(30));
                assert!(notifier.is_started());
                notifier.notify(0);
                assert!(!notifier.is_started());
                assert_eq!(*sink.0.borrow(), vec![0]);

                // a second notify with nothing armed is suppressed.
                notifier.notify(5);
                assert_eq!(*sink.0.borrow(), vec![0]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn restarting_cancels_the_previous_timer() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let sink = RecordingSink::default();
                let mut notifier = Notifier::new("Slot_0", Rc::new(sink.clone()) as Rc<dyn CompletionSink>);
                notifier.start(Duration::from_secs(30));
                notifier.start(Duration::from_secs(30));
                assert!(notifier.is_started());
                notifier.notify(0);
                assert_eq!(*sink.0.borrow(), vec![0]);
            })
            .await;
    }
}
