//! Slot configuration loading (`spec.md` §3, ambient loader per `SPEC_FULL.md` §3).
//!
//! Grounded on `ssahani-guestkit`'s `serde`+`toml` config style. The wire
//! format itself is an implementation detail `spec.md` leaves unspecified;
//! this loader exists so the crate has somewhere to get a `SlotConfig` from
//! without hand-wiring slots in `main`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::nbd::NbdDevice;

/// Activation mode for a slot (`spec.md` §3). The repository this spec was
/// distilled from calls this `legacy` vs `standard`; per `spec.md` §9's open
/// question, this crate only has `Standard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Proxy,
    Standard,
}

#[derive(Debug, Deserialize)]
struct RawSlot {
    name: String,
    mode: Mode,
    nbd_device: String,
    unix_socket: PathBuf,
    endpoint_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    block_size: Option<u32>,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_gadget_prefix")]
    gadget_prefix: PathBuf,
    #[serde(default = "default_bus_prefix")]
    bus_prefix: PathBuf,
    #[serde(default)]
    slot: Vec<RawSlot>,
}

fn default_gadget_prefix() -> PathBuf {
    PathBuf::from("/sys/kernel/config/usb_gadget")
}

fn default_bus_prefix() -> PathBuf {
    PathBuf::from("/sys/class/udc")
}

/// Immutable, per-slot configuration (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct SlotConfig {
    pub name: String,
    pub mode: Mode,
    pub nbd_device: NbdDevice,
    pub unix_socket: PathBuf,
    pub endpoint_id: Option<String>,
    pub timeout: Duration,
    pub block_size: Option<u32>,
}

/// Fully loaded, validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gadget_prefix: PathBuf,
    pub bus_prefix: PathBuf,
    pub slots: Vec<SlotConfig>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    fn parse(text: &str, path_for_errors: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path_for_errors.to_string(),
            source,
        })?;

        let mut names = HashSet::new();
        let mut devices: HashSet<String> = HashSet::new();
        let mut slots = Vec::with_capacity(raw.slot.len());

        for s in raw.slot {
            if !names.insert(s.name.clone()) {
                return Err(ConfigError::DuplicateName(s.name));
            }

            let nbd_device = NbdDevice::parse(&s.nbd_device);
            if !nbd_device.is_valid() {
                return Err(ConfigError::InvalidDevice(s.name, s.nbd_device));
            }
            if !devices.insert(s.nbd_device.clone()) {
                return Err(ConfigError::DuplicateDevice(
                    s.nbd_device.clone(),
                    s.name.clone(),
                    s.name,
                ));
            }

            if s.mode == Mode::Proxy && s.endpoint_id.is_none() {
                return Err(ConfigError::MissingEndpointId(s.name));
            }

            slots.push(SlotConfig {
                name: s.name,
                mode: s.mode,
                nbd_device,
                unix_socket: s.unix_socket,
                endpoint_id: s.endpoint_id,
                timeout: Duration::from_secs(s.timeout_secs),
                block_size: s.block_size,
            });
        }

        Ok(Config {
            gadget_prefix: raw.gadget_prefix,
            bus_prefix: raw.bus_prefix,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        gadget_prefix = "/sys/kernel/config/usb_gadget"
        bus_prefix = "/sys/class/udc"

        [[slot]]
        name = "Slot_0"
        mode = "proxy"
        nbd_device = "nbd0"
        unix_socket = "/run/virtual-media/Slot_0.sock"
        endpoint_id = "slot0"
        timeout_secs = 10

        [[slot]]
        name = "Slot_1"
        mode = "standard"
        nbd_device = "nbd1"
        unix_socket = "/run/virtual-media/Slot_1.sock"
    "#;

    #[test]
    fn parses_sample_config() {
        let cfg = Config::parse(SAMPLE, "<test>").unwrap();
        assert_eq!(cfg.slots.len(), 2);
        assert_eq!(cfg.slots[0].name, "Slot_0");
        assert_eq!(cfg.slots[0].timeout, Duration::from_secs(10));
        assert_eq!(cfg.slots[1].timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_duplicate_names() {
        let text = SAMPLE.replace("Slot_1", "Slot_0");
        assert!(matches!(
            Config::parse(&text, "<test>"),
            Err(ConfigError::DuplicateName(_))
        ));
    }

    #[test]
    fn rejects_duplicate_devices() {
        let text = SAMPLE.replace("nbd_device = \"nbd1\"", "nbd_device = \"nbd0\"");
        assert!(matches!(
            Config::parse(&text, "<test>"),
            Err(ConfigError::DuplicateDevice(..))
        ));
    }

    #[test]
    fn rejects_invalid_device() {
        let text = SAMPLE.replace("nbd_device = \"nbd1\"", "nbd_device = \"nbd99\"");
        assert!(matches!(
            Config::parse(&text, "<test>"),
            Err(ConfigError::InvalidDevice(..))
        ));
    }

    #[test]
    fn proxy_mode_requires_endpoint_id() {
        let text = SAMPLE.replace("endpoint_id = \"slot0\"\n", "");
        assert!(matches!(
            Config::parse(&text, "<test>"),
            Err(ConfigError::MissingEndpointId(_))
        ));
    }
}
