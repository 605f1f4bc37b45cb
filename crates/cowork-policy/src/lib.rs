//! Deny-wins policy pipeline: command/path guardrails, workspace
//! containment, channel attenuation, and per-tool risk rules.

pub mod guardrails;
pub mod manager;

pub use manager::{PolicyConfig, PolicyContext, PolicyDecision, PolicyManager, ToolRisk};
