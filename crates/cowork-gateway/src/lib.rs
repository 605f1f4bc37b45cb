//! CoWork OS Gateway — the Control Plane WebSocket server and the
//! Webhook/Hooks HTTP server, both hosted on the same axum `Router`.

pub mod control_plane;
pub mod webhook;

pub use control_plane::{start_gateway, ExtendedConfig};
