//! macOS `sandbox-exec` (Seatbelt) tier: confines the child to the workspace
//! directory and, unless the request opts in, denies all network access.

use crate::{cap_output, SandboxError, SandboxKind, SandboxRequest, SandboxResult, SandboxTier};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub struct SandboxExecTier {
    workspace_root: PathBuf,
}

impl SandboxExecTier {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

/// Build a minimal Seatbelt profile: deny everything by default, allow
/// process execution and reads everywhere (needed for dynamic linking),
/// writes confined to `root`, and network only when `network_allowed`.
fn build_profile(root: &std::path::Path, network_allowed: bool) -> String {
    let root_literal = root.display();
    let network_clause = if network_allowed {
        "(allow network*)"
    } else {
        "(deny network*)"
    };
    format!(
        r#"(version 1)
(deny default)
(allow process-fork)
(allow process-exec)
(allow file-read*)
(allow file-write* (subpath "{root_literal}"))
(allow file-write* (subpath "/tmp"))
(allow file-write* (subpath "/private/tmp"))
(allow sysctl-read)
(allow mach-lookup)
{network_clause}
"#
    )
}

#[async_trait]
impl SandboxTier for SandboxExecTier {
    async fn run(&self, request: &SandboxRequest, cancel: CancellationToken) -> Result<SandboxResult, SandboxError> {
        let start = Instant::now();
        let profile = build_profile(&self.workspace_root, request.network_allowed);

        let mut child = Command::new("sandbox-exec")
            .arg("-p")
            .arg(&profile)
            .arg("bash")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.working_dir)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::Infrastructure(format!("failed to spawn sandbox-exec: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Ok(SandboxResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: "cancelled".to_string(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    timed_out: false,
                })
            }
            outcome = tokio::time::timeout(request.timeout, async {
                use tokio::io::AsyncReadExt;
                let stdout_fut = async {
                    if let Some(pipe) = stdout_pipe.as_mut() {
                        let _ = pipe.read_to_end(&mut stdout_buf).await;
                    }
                };
                let stderr_fut = async {
                    if let Some(pipe) = stderr_pipe.as_mut() {
                        let _ = pipe.read_to_end(&mut stderr_buf).await;
                    }
                };
                let (status, _, _) = tokio::join!(child.wait(), stdout_fut, stderr_fut);
                status
            }) => {
                match outcome {
                    Ok(Ok(status)) => {
                        let (stdout, stdout_truncated) = cap_output(String::from_utf8_lossy(&stdout_buf).into_owned());
                        let (stderr, stderr_truncated) = cap_output(String::from_utf8_lossy(&stderr_buf).into_owned());
                        Ok(SandboxResult {
                            exit_code: status.code(),
                            stdout,
                            stderr,
                            stdout_truncated,
                            stderr_truncated,
                            duration_ms: start.elapsed().as_millis() as u64,
                            timed_out: false,
                        })
                    }
                    Ok(Err(e)) => Err(SandboxError::Infrastructure(format!("failed to wait: {e}"))),
                    Err(_) => Ok(SandboxResult {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("command timed out after {}s", request.timeout.as_secs()),
                        stdout_truncated: false,
                        stderr_truncated: false,
                        duration_ms: start.elapsed().as_millis() as u64,
                        timed_out: true,
                    }),
                }
            }
        }
    }

    fn kind(&self) -> SandboxKind {
        SandboxKind::SandboxExec
    }

    async fn is_available(&self) -> bool {
        cfg!(target_os = "macos") && which_sandbox_exec().await
    }
}

async fn which_sandbox_exec() -> bool {
    tokio::process::Command::new("which")
        .arg("sandbox-exec")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
