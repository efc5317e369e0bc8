//! Scoped resources (`spec.md` §4.2): each acquires on construction and
//! releases on drop, never on an explicit call. Grounded on
//! `original_source/src/resources.{hpp,cpp}`.

pub mod credentials;
pub mod directory;
pub mod gadget;
pub mod mount;
pub mod process;
pub mod secret;

pub use credentials::Credentials;
pub use directory::Directory;
pub use gadget::Gadget;
pub use mount::MountBackend;
pub use process::Process;
pub use secret::SecretFile;
