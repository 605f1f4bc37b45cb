//! Channel Security: pairing codes, per-channel brute-force lockout,
//! allowlisting, and context-policy attenuation for messages that arrive
//! over an external channel (SMS, chat bridge, etc.) rather than the
//! Control Plane.

pub mod pairing;
pub mod security;

pub use security::ChannelSecurity;
