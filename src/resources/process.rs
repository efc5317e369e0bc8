//! Supervised `nbd-client`/`nbdkit` subprocess (`spec.md` §4.2's `Process`).
//!
//! Grounded on `original_source/src/utils/impl/child.cpp` (piped
//! stdout+stderr read line-by-line for diagnostics) and
//! `original_source/src/resources.cpp`'s `Process::~Process()`, which posts
//! `emitSubprocessStoppedEvent()` back onto the io_context because the wait
//! for exit is asynchronous and the destructor can't block for it. The Rust
//! `Drop` here plays the same trick with `spawn_local`, since `Drop` can't be
//! `async` either.

use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::events::{Event, EventEnvelope, EventSender};

/// Grace period between SIGTERM and SIGKILL on teardown.
const TERM_GRACE: Duration = Duration::from_secs(2);

/// A running `nbd-client`/`nbdkit` child, supervised for the lifetime of an
/// activation.
///
/// Construction spawns two detached tasks: one draining stdout/stderr to the
/// log line-by-line, one awaiting exit and posting
/// [`Event::SubprocessStopped`] back to the owning slot's channel. `Process`
/// itself only keeps the pid, so `stop()` can signal it without fighting the
/// exit-watcher task over ownership of the `Child`.
#[derive(Debug)]
pub struct Process {
    slot: String,
    pid: Pid,
    exited: Option<oneshot::Receiver<()>>,
}

impl Process {
    /// Spawns `program` with `args`. `events` receives `SubprocessStopped`
    /// when the child exits, whether that happens on its own or via
    /// [`Process::stop`].
    pub fn spawn(
        slot: &str,
        program: &str,
        args: &[String],
        events: EventSender,
    ) -> std::io::Result<Self> {
        let mut child: Child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| std::io::Error::other("child exited before it could be observed"))?;
        log::info!("slot {slot}: spawned {program} {args:?} (pid {pid})");

        if let Some(stdout) = child.stdout.take() {
            spawn_pipe_reader(slot.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_pipe_reader(slot.to_string(), "stderr", stderr);
        }

        let (exited_tx, exited_rx) = oneshot::channel();
        let wait_slot = slot.to_string();
        tokio::task::spawn_local(async move {
            let status = child.wait().await;
            let exit_code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    log::warn!("slot {wait_slot}: failed to wait for subprocess: {e}");
                    -1
                }
            };
            log::info!("slot {wait_slot}: subprocess exited with code {exit_code}");
            let _ = exited_tx.send(());
            let _ = events.send(EventEnvelope::internal(Event::SubprocessStopped { exit_code }));
        });

        Ok(Process {
            slot: slot.to_string(),
            pid: Pid::from_raw(pid as i32),
            exited: Some(exited_rx),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// SIGTERM, then SIGKILL after a grace period if the exit watcher
    /// hasn't observed termination yet. Idempotent: a second call with no
    /// exit watcher left (already consumed) is a no-op.
    pub async fn stop(&mut self) {
        let Some(exited) = self.exited.take() else {
            return;
        };

        if let Err(e) = kill(self.pid, Signal::SIGTERM) {
            if e != nix::errno::Errno::ESRCH {
                log::warn!("slot {}: SIGTERM to pid {} failed: {e}", self.slot, self.pid);
            }
            return;
        }

        if timeout(TERM_GRACE, exited).await.is_err() {
            log::warn!(
                "slot {}: pid {} did not exit within grace period, sending SIGKILL",
                self.slot,
                self.pid
            );
            if let Err(e) = kill(self.pid, Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    log::warn!("slot {}: SIGKILL to pid {} failed: {e}", self.slot, self.pid);
                }
            }
        }
    }
}

fn spawn_pipe_reader<R>(slot: String, stream: &'static str, reader: R)
where
    R: tokio::io::AsyncRead + Unpin + 'static,
{
    tokio::task::spawn_local(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => log::info!("slot {slot} ({stream}): {line}"),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("slot {slot} ({stream}): pipe read error: {e}");
                    break;
                }
            }
        }
    });
}

impl Drop for Process {
    fn drop(&mut self) {
        // A bare drop with no prior `stop()` call happens on abrupt shutdown
        // (the whole `LocalSet` is torn down without anyone awaiting
        // `stop()`'s grace period). SIGTERM it here, synchronously and
        // best-effort, same as `Gadget`'s drop-time teardown — there's no
        // time left to wait for SIGKILL escalation, but the signal still
        // reaches the child before the process exits.
        if self.exited.is_some() {
            log::debug!(
                "slot {}: process handle for pid {} dropped without stop(), sending SIGTERM",
                self.slot,
                self.pid
            );
            if let Err(e) = kill(self.pid, Signal::SIGTERM) {
                if e != nix::errno::Errno::ESRCH {
                    log::warn!("slot {}: SIGTERM to pid {} on drop failed: {e}", self.slot, self.pid);
                }
            }
        }
    }
}
