//! The Control Plane: a WebSocket endpoint mirroring the Agent Daemon's
//! request/event surface for headless operation, grounded on the teacher's
//! `ws.rs`/`rpc.rs`/`auth.rs`/`server.rs`.

pub mod auth;
pub mod rpc;
pub mod server;
pub mod ws;

pub use server::{start_gateway, ExtendedConfig, GatewayState};
