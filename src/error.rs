//! Error types for the lifecycle controller (`spec.md` §7).

use thiserror::Error;

/// Errno-equivalent codes surfaced across the request surface (`spec.md` §6).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("operation not permitted in the current state")]
    NotPermitted,

    #[error("slot is busy with another activation")]
    ResourceBusy,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not supported")]
    OperationNotSupported,

    #[error("connection refused: {0}")]
    ConnectionRefused(String),
}

impl MediaError {
    /// The errno-equivalent numeric code carried on the `Completion` signal.
    pub fn errno(&self) -> i32 {
        match self {
            MediaError::NotPermitted => libc::EPERM,
            MediaError::ResourceBusy => libc::EBUSY,
            MediaError::InvalidArgument(_) => libc::EINVAL,
            MediaError::OperationNotSupported => libc::ENOTSUP,
            MediaError::ConnectionRefused(_) => libc::ECONNREFUSED,
        }
    }
}

/// Internal classification of why a lifecycle transition failed (`spec.md` §7).
///
/// Never crosses the request surface directly; the state machine flattens
/// each kind into a `Completion` errno or, for `UserError`, a synchronous
/// [`MediaError`] reply.
#[derive(Debug, Clone)]
pub enum LifecycleError {
    /// Subprocess failed to start, or a backend mount failed.
    TransientActivation(String),
    /// The kernel reported a udev state inconsistent with what the machine expected.
    UnexpectedUdev(String),
    /// A method was called in a state that does not accept it.
    UserError(MediaError),
    /// Gadget teardown failed; the machine self-dispatches `UdevChange(Unknown)`.
    Catastrophic(String),
}

impl LifecycleError {
    pub fn completion_errno(&self) -> i32 {
        match self {
            LifecycleError::TransientActivation(_) => libc::ECONNREFUSED,
            LifecycleError::UnexpectedUdev(_) => libc::ECONNREFUSED,
            LifecycleError::Catastrophic(_) => libc::ECONNREFUSED,
            LifecycleError::UserError(e) => e.errno(),
        }
    }
}

/// Failures loading and validating the slot configuration (ambient, not part
/// of the core lifecycle behavior — `spec.md` §1 treats config loading as an
/// external collaborator).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate slot name {0:?}")]
    DuplicateName(String),

    #[error("duplicate nbd device {0:?} (owned by both {1:?} and {2:?})")]
    DuplicateDevice(String, String, String),

    #[error("slot {0:?} has an invalid nbd device {1:?}")]
    InvalidDevice(String, String),

    #[error("slot {0:?} is Proxy mode but is missing endpoint_id")]
    MissingEndpointId(String),
}
