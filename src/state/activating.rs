//! Activation attempt (`spec.md` §4.6's `Activating`).
//!
//! Grounded on `original_source/src/state/activating_state.cpp`'s
//! `onEnter`/`activateProxyMode` (mode dispatch, `nbd-client` argv) and
//! `handleEvent(UdevStateChangeEvent)` (Inserted constructs the `Gadget`,
//! anything else falls through to `Deactivating`).

use crate::config::Mode;
use crate::error::MediaError;
use crate::events::{DeviceState, Event};
use crate::resources::gadget::Gadget;
use crate::resources::mount::MountBackend;
use crate::resources::process::Process;
use crate::resources::secret::SecretFile;
use crate::slot::SlotMachine;

use super::deactivating::Deactivating;
use super::{SlotState, StepResult};

pub fn on_enter(machine: &mut SlotMachine) -> Option<SlotState> {
    machine.exit_code = -1;

    let activation = match machine.config.mode {
        Mode::Proxy => spawn_proxy(machine),
        Mode::Standard => spawn_standard(machine),
    };

    match activation {
        Ok(process) => {
            machine.process = Some(process);
            None
        }
        Err(message) => {
            log::warn!("slot {}: activation failed: {message}", machine.name);
            Some(SlotState::Ready {
                pending: Some(Err(libc::ECONNREFUSED)),
            })
        }
    }
}

fn spawn_proxy(machine: &SlotMachine) -> Result<Process, String> {
    let device_path = machine
        .config
        .nbd_device
        .device_path()
        .ok_or("slot has no valid nbd device")?;

    let args = vec![
        "-t".to_string(),
        machine.config.timeout.as_secs().to_string(),
        "-u".to_string(),
        machine.config.unix_socket.display().to_string(),
        device_path,
        "-n".to_string(),
    ];

    Process::spawn(&machine.name, "nbd-client", &args, machine.events.clone())
        .map_err(|e| format!("spawn nbd-client: {e}"))
}

/// Prepares an SMB or HTTPS backend for the current target and spawns
/// `nbdkit` against it. Backend selection by URL scheme is not specified in
/// detail (`spec.md` §1's non-goal); this picks the plugin from a `smb://`
/// or `https://`/`http://` prefix and otherwise fails the activation.
fn spawn_standard(machine: &mut SlotMachine) -> Result<Process, String> {
    let device_path = machine
        .config
        .nbd_device
        .device_path()
        .ok_or("slot has no valid nbd device")?;

    let Some(target) = machine.target.as_mut() else {
        return Err("Standard mode activation with no target".to_string());
    };

    let mut args = vec![
        "-U".to_string(),
        machine.config.unix_socket.display().to_string(),
    ];
    if let Some(block_size) = machine.config.block_size {
        args.push("--blocksize".to_string());
        args.push(block_size.to_string());
    }
    let _ = &device_path;

    if let Some(unc) = target.image_url.strip_prefix("smb://") {
        let credentials = target
            .credentials
            .as_ref()
            .ok_or("smb:// target requires credentials")?;
        let backend = MountBackend::mount_cifs(&format!("//{unc}"), credentials, target.rw)
            .map_err(|e| e.to_string())?;
        args.push("file".to_string());
        args.push(format!("file={}", backend.path().display()));
        target.mount = Some(backend);
    } else if target.image_url.starts_with("https://") || target.image_url.starts_with("http://") {
        args.push("curl".to_string());
        args.push(format!("url={}", target.image_url));
        if let Some(credentials) = target.credentials.as_ref() {
            let secret = SecretFile::write_credentials(credentials).map_err(|e| e.to_string())?;
            args.push(format!("config={}", secret.path().display()));
            target.secret = Some(secret);
        }
    } else {
        return Err(format!("unsupported image URL scheme: {}", target.image_url));
    }

    Process::spawn(&machine.name, "nbdkit", &args, machine.events.clone())
        .map_err(|e| format!("spawn nbdkit: {e}"))
}

pub fn handle(machine: &mut SlotMachine, event: Event) -> StepResult {
    match event {
        Event::UdevChange {
            state: DeviceState::Inserted,
        } => match Gadget::configure(
            &machine.name,
            &machine.gadget_prefix,
            &machine.bus_prefix,
            &machine.config.nbd_device,
            machine.target.as_ref().map(|t| t.rw).unwrap_or(false),
            machine.events.clone(),
        ) {
            Ok(gadget) => {
                machine.gadget = Some(gadget);
                StepResult::accepted(SlotState::Active)
            }
            Err(e) => {
                log::error!("slot {}: gadget construction failed: {e}", machine.name);
                StepResult::accepted(SlotState::Deactivating(Deactivating::starting_with(
                    Event::UdevChange {
                        state: DeviceState::Unknown,
                    },
                )))
            }
        },
        Event::UdevChange { state } => StepResult::accepted(SlotState::Deactivating(
            Deactivating::starting_with(Event::UdevChange { state }),
        )),
        Event::SubprocessStopped { exit_code } => {
            machine.exit_code = exit_code;
            machine.process = None;
            StepResult::accepted(SlotState::Ready {
                pending: Some(Err(libc::ECONNREFUSED)),
            })
        }
        Event::RegisterDbus | Event::Mount { .. } | Event::Unmount => {
            StepResult::to(SlotState::Activating, Err(MediaError::ResourceBusy))
        }
    }
}
