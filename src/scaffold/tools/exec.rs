//! Code execution tool backed by a Docker container.
//!
//! The container is created lazily on the first command with the repository
//! workspace bind-mounted at `/workspace`, and removed on shutdown.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{str_arg, ExecutionContext, Tool, ToolError, ToolResult};

/// Image used for code execution unless configured otherwise.
pub const DEFAULT_EXEC_IMAGE: &str = "maximiliantoepfer1/autogen-agent";

/// Default timeout for one command in seconds.
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 120;

/// Mount point of the workspace inside the container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Maximum output length kept per stream.
const MAX_OUTPUT_LENGTH: usize = 100_000;

/// Output of one executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn into_result(self) -> ToolResult {
        if self.exit_code == 0 {
            let mut output = self.stdout;
            if !self.stderr.trim().is_empty() {
                output.push_str(&self.stderr);
            }
            ToolResult::success(output)
        } else {
            ToolResult::partial(
                self.stdout,
                format!("[exit code {}]\n{}", self.exit_code, self.stderr.trim()),
            )
        }
    }
}

/// Runs shell commands in an isolated environment.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Execute a shell command and collect its output.
    async fn execute(&self, command: &str) -> Result<ExecOutput, ToolError>;

    /// Release the environment. Safe to call more than once.
    async fn shutdown(&self) -> Result<(), ToolError>;
}

/// [`CodeExecutor`] running commands with `sh -c` in a Docker container.
pub struct DockerCodeExecutor {
    docker: Docker,
    image: String,
    workspace: PathBuf,
    timeout_secs: u64,
    container_id: Mutex<Option<String>>,
}

impl DockerCodeExecutor {
    /// Connect to the local Docker daemon.
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self, ToolError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ToolError::DockerError(format!("Failed to connect to Docker: {}", e)))?;
        let workspace = workspace.as_ref();
        let workspace = workspace.canonicalize().map_err(|e| {
            ToolError::FilesystemError(format!(
                "cannot open workspace '{}': {}",
                workspace.display(),
                e
            ))
        })?;
        Ok(Self {
            docker,
            image: DEFAULT_EXEC_IMAGE.to_string(),
            workspace,
            timeout_secs: DEFAULT_EXEC_TIMEOUT_SECS,
            container_id: Mutex::new(None),
        })
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    async fn ensure_container(&self) -> Result<String, ToolError> {
        let mut guard = self.container_id.lock().await;
        if let Some(id) = guard.as_ref() {
            return Ok(id.clone());
        }

        if self.docker.inspect_image(&self.image).await.is_err() {
            tracing::info!(image = %self.image, "Pulling code execution image");
            let options = CreateImageOptions {
                from_image: self.image.as_str(),
                ..Default::default()
            };
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(result) = stream.next().await {
                result.map_err(|e| ToolError::DockerError(format!("Failed to pull image: {}", e)))?;
            }
        }

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                self.workspace.display(),
                CONTAINER_WORKDIR
            )]),
            ..Default::default()
        };
        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            host_config: Some(host_config),
            tty: Some(true),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: format!("swe-crew-exec-{}", uuid::Uuid::new_v4()),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| ToolError::DockerError(format!("Failed to create container: {}", e)))?;
        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ToolError::DockerError(format!("Failed to start container: {}", e)))?;

        tracing::info!(
            container = %response.id,
            workspace = %self.workspace.display(),
            "Started code execution container"
        );
        *guard = Some(response.id.clone());
        Ok(response.id)
    }

    async fn run_exec(&self, container_id: &str, command: &str) -> Result<ExecOutput, ToolError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["sh", "-c", command]),
            working_dir: Some(CONTAINER_WORKDIR),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| ToolError::DockerError(format!("Failed to create exec: {}", e)))?;

        let result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| ToolError::DockerError(format!("Failed to start exec: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            let text = String::from_utf8_lossy(&message);
                            if stdout.len() + text.len() <= MAX_OUTPUT_LENGTH {
                                stdout.push_str(&text);
                            }
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            let text = String::from_utf8_lossy(&message);
                            if stderr.len() + text.len() <= MAX_OUTPUT_LENGTH {
                                stderr.push_str(&text);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(ToolError::ExecutionFailed(format!(
                                "Error reading output: {}",
                                e
                            )));
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ToolError::ExecutionFailed(
                    "Unexpected detached execution".to_string(),
                ));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| ToolError::DockerError(format!("Failed to inspect exec: {}", e)))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl CodeExecutor for DockerCodeExecutor {
    async fn execute(&self, command: &str) -> Result<ExecOutput, ToolError> {
        let container_id = self.ensure_container().await?;
        timeout(
            Duration::from_secs(self.timeout_secs),
            self.run_exec(&container_id, command),
        )
        .await
        .map_err(|_| ToolError::Timeout {
            seconds: self.timeout_secs,
        })?
    }

    async fn shutdown(&self) -> Result<(), ToolError> {
        let Some(id) = self.container_id.lock().await.take() else {
            return Ok(());
        };
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&id, Some(options))
            .await
            .map_err(|e| ToolError::DockerError(format!("Failed to remove container: {}", e)))?;
        tracing::debug!(container = %id, "Removed code execution container");
        Ok(())
    }
}

/// Tool exposing a [`CodeExecutor`] to agents.
pub struct ExecTool {
    executor: Arc<dyn CodeExecutor>,
}

impl ExecTool {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command in a sandbox container with the repository mounted at /workspace. Usage: `exec <shell command>`"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to run"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let command = str_arg(&args, "command")?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "Command cannot be empty".to_string(),
            ));
        }
        tracing::debug!(agent = %ctx.agent, command = %command, "Executing command in sandbox");
        Ok(self.executor.execute(command).await?.into_result())
    }
}
