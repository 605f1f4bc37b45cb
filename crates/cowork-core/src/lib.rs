//! Shared data model, wire protocol, and error type for the CoWork agent core.

pub mod error;
pub mod lockout;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use lockout::LockoutTracker;
pub use protocol::*;
pub use types::*;
