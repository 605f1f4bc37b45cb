//! On-disk persistence: atomic settings files, an append-only per-task event
//! log, and OS-keyring-backed secret storage.

pub mod event_log;
pub mod secrets;
pub mod settings;

pub use event_log::EventLog;
pub use secrets::{SecretError, SecretStore};
pub use settings::{config_dir, read_or_none, write_atomic, StoreError};
