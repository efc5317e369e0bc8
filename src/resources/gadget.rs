//! USB mass-storage gadget configfs tree (`spec.md` §4.7).
//!
//! Grounded on `original_source/src/resources.cpp`'s `Gadget` (configure on
//! construction, reverse on drop, escalate on teardown failure) and
//! `original_source/src/utils/impl/gadget_dirs.cpp` / `file_printer.cpp` for
//! the directory/symlink/echo primitives the configfs tree is built from.
//! The tree layout itself is an opaque configure/teardown shell-out
//! (`spec.md` §1's non-goal); only the scaffolding — create dirs, symlink a
//! function into a config, write attribute files, bind/unbind a UDC — is
//! modeled here.

use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use crate::error::MediaError;
use crate::events::{DeviceState, Event, EventEnvelope, EventSender};
use crate::nbd::NbdDevice;

const FUNCTION: &str = "mass_storage.usb0";
const CONFIG: &str = "c.1";

/// A mass-storage function bound into the gadget's configfs tree for one
/// slot. Configuring writes the tree and binds a UDC taken from
/// `bus_prefix`; dropping reverses it.
///
/// Teardown is idempotent: it is safe to configure-remove a tree that was
/// never fully built (e.g. construction failed partway through), matching
/// `spec.md` §4.7's "idempotent under repeated teardown".
#[derive(Debug)]
pub struct Gadget {
    slot: String,
    root: PathBuf,
    udc_path: PathBuf,
    events: EventSender,
}

impl Gadget {
    /// Builds `<gadget_prefix>/<slot>` describing `nbd_device` as the
    /// function's backing file, then binds it to the first UDC found under
    /// `bus_prefix`.
    pub fn configure(
        slot: &str,
        gadget_prefix: &Path,
        bus_prefix: &Path,
        nbd_device: &NbdDevice,
        rw: bool,
        events: EventSender,
    ) -> Result<Self, MediaError> {
        let device_path = nbd_device
            .device_path()
            .ok_or_else(|| MediaError::InvalidArgument("not a valid nbd device".into()))?;

        let root = gadget_prefix.join(slot);
        let function_dir = root.join("functions").join(FUNCTION);
        let config_dir = root.join("configs").join(CONFIG);
        let udc_path = root.join("UDC");

        (|| -> std::io::Result<()> {
            fs::create_dir_all(function_dir.join("lun.0"))?;
            fs::create_dir_all(&config_dir)?;
            fs::write(function_dir.join("lun.0/file"), device_path.as_bytes())?;
            fs::write(
                function_dir.join("lun.0/ro"),
                if rw { b"0" } else { b"1" },
            )?;
            let link = config_dir.join(FUNCTION);
            if link.symlink_metadata().is_err() {
                unix_fs::symlink(&function_dir, &link)?;
            }

            let udc = first_udc(bus_prefix)?;
            fs::write(&udc_path, udc.as_bytes())?;
            Ok(())
        })()
        .map_err(|e| MediaError::ConnectionRefused(format!("gadget configure for {slot}: {e}")))?;

        log::info!("slot {slot}: configured gadget at {}", root.display());
        Ok(Gadget {
            slot: slot.to_string(),
            root,
            udc_path,
            events,
        })
    }

    fn teardown(&self) -> std::io::Result<()> {
        // Unbind first; absence of a UDC binding is not an error (unbinding
        // twice, or a tree that never finished binding, must both succeed).
        let _ = fs::write(&self.udc_path, b"");

        let function_dir = self.root.join("functions").join(FUNCTION);
        let link = self.root.join("configs").join(CONFIG).join(FUNCTION);
        if link.symlink_metadata().is_ok() {
            fs::remove_file(&link)?;
        }
        if function_dir.exists() {
            fs::remove_dir_all(function_dir.parent().unwrap())?;
        }
        if self.root.join("configs").exists() {
            fs::remove_dir_all(self.root.join("configs"))?;
        }
        Ok(())
    }
}

impl Drop for Gadget {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            // This shouldn't ever happen; escalate so the machine gets a
            // chance to recover by cycling back through Deactivating.
            log::error!("slot {}: gadget teardown failed: {e}", self.slot);
            let events = self.events.clone();
            let slot = self.slot.clone();
            tokio::task::spawn_local(async move {
                log::error!("slot {slot}: posting UdevChange(Unknown) after failed gadget teardown");
                let _ = events.send(EventEnvelope::internal(Event::UdevChange {
                    state: DeviceState::Unknown,
                }));
            });
        } else {
            log::debug!("slot {}: gadget torn down", self.slot);
        }
    }
}

fn first_udc(bus_prefix: &Path) -> std::io::Result<String> {
    for entry in fs::read_dir(bus_prefix)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            return Ok(name.to_string());
        }
    }
    Err(std::io::Error::other(format!(
        "no UDC found under {}",
        bus_prefix.display()
    )))
}
