//! Docker-backed tier: runs each command in a short-lived, read-only-rootfs
//! container bind-mounting the workspace, torn down after the call.

use crate::{cap_output, SandboxError, SandboxKind, SandboxRequest, SandboxResult, SandboxTier};
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use std::path::PathBuf;
use std::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const DEFAULT_IMAGE: &str = "alpine:3.20";

pub struct DockerTier {
    workspace_root: PathBuf,
    image: String,
}

impl DockerTier {
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root, image: DEFAULT_IMAGE.to_string() }
    }

    fn connect(&self) -> Result<Docker, SandboxError> {
        Docker::connect_with_local_defaults().map_err(|e| SandboxError::Infrastructure(e.to_string()))
    }

    async fn run_in_container(
        &self,
        docker: &Docker,
        request: &SandboxRequest,
    ) -> Result<SandboxResult, SandboxError> {
        let start = Instant::now();
        let container_name = format!("cowork-sandbox-{}", uuid::Uuid::new_v4());

        let network_mode = if request.network_allowed { "bridge" } else { "none" }.to_string();
        let host_config = HostConfig {
            network_mode: Some(network_mode),
            readonly_rootfs: Some(true),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            pids_limit: Some(256),
            binds: Some(vec![format!("{}:/workspace", self.workspace_root.display())]),
            tmpfs: Some(std::collections::HashMap::from([("/tmp".to_string(), "rw,size=256m".to_string())])),
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), format!("{}", request.timeout.as_secs() + 5)]),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        docker
            .create_container(
                Some(CreateContainerOptions { name: container_name.clone(), platform: None }),
                config,
            )
            .await
            .map_err(|e| SandboxError::Infrastructure(e.to_string()))?;

        docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::Infrastructure(e.to_string()))?;

        let result = self.exec_and_collect(docker, &container_name, request).await;

        let remove_opts = RemoveContainerOptions { force: true, ..Default::default() };
        let _ = docker.remove_container(&container_name, Some(remove_opts)).await;

        result.map(|(exit_code, stdout, stderr, timed_out)| {
            let (stdout, stdout_truncated) = cap_output(stdout);
            let (stderr, stderr_truncated) = cap_output(stderr);
            SandboxResult {
                exit_code,
                stdout,
                stderr,
                stdout_truncated,
                stderr_truncated,
                duration_ms: start.elapsed().as_millis() as u64,
                timed_out,
            }
        })
    }

    async fn exec_and_collect(
        &self,
        docker: &Docker,
        container_name: &str,
        request: &SandboxRequest,
    ) -> Result<(Option<i32>, String, String, bool), SandboxError> {
        let create_exec = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["bash".to_string(), "-c".to_string(), request.command.clone()]),
            working_dir: Some("/workspace".to_string()),
            ..Default::default()
        };

        let created = docker
            .create_exec(container_name, create_exec)
            .await
            .map_err(|e| SandboxError::Infrastructure(e.to_string()))?;

        let started = docker
            .start_exec(&created.id, Some(StartExecOptions { detach: false, tty: false, output_capacity: None }))
            .await
            .map_err(|e| SandboxError::Infrastructure(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let collected = tokio::time::timeout(request.timeout, async {
            if let StartExecResults::Attached { mut output, .. } = started {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
        })
        .await;

        if collected.is_err() {
            return Ok((None, stdout, stderr, true));
        }

        let inspect = docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| SandboxError::Infrastructure(e.to_string()))?;

        Ok((inspect.exit_code.and_then(|c| i32::try_from(c).ok()), stdout, stderr, false))
    }
}

#[async_trait]
impl SandboxTier for DockerTier {
    async fn run(&self, request: &SandboxRequest, cancel: CancellationToken) -> Result<SandboxResult, SandboxError> {
        let docker = self.connect()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(SandboxResult {
                exit_code: None,
                stdout: String::new(),
                stderr: "cancelled".to_string(),
                stdout_truncated: false,
                stderr_truncated: false,
                duration_ms: 0,
                timed_out: false,
            }),
            result = self.run_in_container(&docker, request) => result,
        }
    }

    fn kind(&self) -> SandboxKind {
        SandboxKind::Docker
    }

    async fn is_available(&self) -> bool {
        match self.connect() {
            Ok(docker) => docker.ping().await.is_ok(),
            Err(_) => false,
        }
    }
}
