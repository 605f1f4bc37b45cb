//! Bare-subprocess fallback tier: no isolation beyond the timeout/cancel
//! rendezvous, used when neither `sandbox-exec` nor Docker is available.

use crate::{cap_output, SandboxError, SandboxKind, SandboxRequest, SandboxResult, SandboxTier};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub struct SubprocessTier {
    workspace_root: PathBuf,
}

impl SubprocessTier {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl SandboxTier for SubprocessTier {
    async fn run(&self, request: &SandboxRequest, cancel: CancellationToken) -> Result<SandboxResult, SandboxError> {
        let start = Instant::now();

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&request.command)
            .current_dir(&request.working_dir)
            .kill_on_drop(true)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| SandboxError::Infrastructure(format!("failed to spawn: {e}")))?;

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
        SandboxKind::Subprocess
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_simple_command() {
        let tier = SubprocessTier::new(std::env::temp_dir());
        let request = SandboxRequest {
            command: "echo hello".to_string(),
            working_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
            network_allowed: false,
        };
        let result = tier.run(&request, CancellationToken::new()).await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let tier = SubprocessTier::new(std::env::temp_dir());
        let request = SandboxRequest {
            command: "sleep 5".to_string(),
            working_dir: std::env::temp_dir(),
            timeout: Duration::from_millis(50),
            network_allowed: false,
        };
        let result = tier.run(&request, CancellationToken::new()).await.unwrap();
        assert!(result.timed_out);
    }

    #[tokio::test]
    async fn cancellation_kills_process() {
        let tier = SubprocessTier::new(std::env::temp_dir());
        let cancel = CancellationToken::new();
        let request = SandboxRequest {
            command: "sleep 5".to_string(),
            working_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(30),
            network_allowed: false,
        };
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });
        let result = tier.run(&request, cancel).await.unwrap();
        assert_eq!(result.stderr, "cancelled");
    }
}
