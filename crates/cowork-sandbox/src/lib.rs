//! Tiered sandbox runner for executing shell commands on behalf of a task.
//!
//! Three tiers, strongest isolation first: macOS `sandbox-exec` (Seatbelt),
//! Docker via `bollard`, and a bare subprocess as the universal fallback.
//! [`select_tier`] probes each in order and returns the strongest available.

mod docker;
mod sandbox_exec;
mod subprocess;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use docker::DockerTier;
pub use sandbox_exec::SandboxExecTier;
pub use subprocess::SubprocessTier;

/// Output past this many bytes is truncated, matching the cap tool results
/// apply before handing text back to the model.
pub const MAX_OUTPUT_BYTES: usize = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxKind {
    SandboxExec,
    Docker,
    Subprocess,
}

#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub command: String,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub network_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl SandboxResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox tier unavailable: {0}")]
    Unavailable(String),
    #[error("sandbox operation failed: {0}")]
    Infrastructure(String),
}

/// Truncate `text` to [`MAX_OUTPUT_BYTES`], returning the (possibly shortened)
/// text and whether truncation occurred.
pub(crate) fn cap_output(text: String) -> (String, bool) {
    if text.len() <= MAX_OUTPUT_BYTES {
        (text, false)
    } else {
        let mut end = MAX_OUTPUT_BYTES;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        (text[..end].to_string(), true)
    }
}

#[async_trait]
pub trait SandboxTier: Send + Sync {
    async fn run(&self, request: &SandboxRequest, cancel: CancellationToken) -> Result<SandboxResult, SandboxError>;
    fn kind(&self) -> SandboxKind;
    async fn is_available(&self) -> bool;
}

/// Probe tiers strongest-first and return the first that reports available.
/// Always succeeds: [`SubprocessTier`] has no external dependency.
pub async fn select_tier(workspace_root: PathBuf) -> Box<dyn SandboxTier> {
    let sandbox_exec = SandboxExecTier::new(workspace_root.clone());
    if sandbox_exec.is_available().await {
        return Box::new(sandbox_exec);
    }

    let docker = DockerTier::new(workspace_root.clone());
    if docker.is_available().await {
        return Box::new(docker);
    }

    Box::new(SubprocessTier::new(workspace_root))
}
