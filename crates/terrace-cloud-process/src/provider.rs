//! Process provider implementation

use crate::error::{ProcessError, Result};
use crate::protocol::{Operation, Request, Response};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Stdio;
use terrace_cloud::{AuthStatus, ProviderAdapter, Properties};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Configuration of a provider command
///
/// Everything the command needs is passed here; the provider reads no
/// process-global state besides what `env` forwards.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Executable to spawn
    pub command: String,
    /// Extra arguments passed on every spawn
    pub args: Vec<String>,
    /// Environment variables set for the child
    pub env: BTreeMap<String, String>,
    /// Provider-level settings sent with every request
    pub settings: Properties,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: Properties) -> Self {
        self.settings = settings;
        self
    }
}

/// Provider that delegates every operation to an external command
pub struct ProcessProvider {
    name: String,
    config: ProcessConfig,
}

impl ProcessProvider {
    pub fn new(name: impl Into<String>, config: ProcessConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    /// Spawn the command, send one request and parse its response
    async fn call(&self, request: &Request<'_>) -> Result<Properties> {
        let payload = serde_json::to_vec(request)?;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.envs(&self.config.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        tracing::debug!(
            "Running: {} {} ({} {})",
            self.config.command,
            self.config.args.join(" "),
            request.operation.as_str(),
            request.id
        );

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ProcessError::CommandNotFound(self.config.command.clone()),
            _ => ProcessError::IoError(e),
        })?;

        // stdin is fed while stdout is drained; either side may fill its pipe first
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output?;
        // A command that ignores its input may close stdin early.
        if let Err(e) = written
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ProcessError::CommandFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        Response::parse(&String::from_utf8_lossy(&output.stdout))?.into_outputs()
    }

    fn request<'a>(
        &'a self,
        operation: Operation,
        kind: &'a str,
        id: &'a str,
        inputs: &'a Properties,
        outputs: Option<&'a Properties>,
    ) -> Request<'a> {
        Request {
            operation,
            kind,
            id,
            inputs,
            outputs,
            settings: &self.config.settings,
        }
    }
}

#[async_trait]
impl ProviderAdapter for ProcessProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn realize(
        &self,
        kind: &str,
        id: &str,
        inputs: &Properties,
    ) -> terrace_cloud::Result<Properties> {
        tracing::info!("Realizing {} '{}' via {}", kind, id, self.config.command);
        let request = self.request(Operation::Realize, kind, id, inputs, None);
        Ok(self.call(&request).await?)
    }

    async fn invoke(
        &self,
        function: &str,
        id: &str,
        inputs: &Properties,
    ) -> terrace_cloud::Result<Properties> {
        let request = self.request(Operation::Invoke, function, id, inputs, None);
        Ok(self.call(&request).await?)
    }

    async fn destroy(
        &self,
        kind: &str,
        id: &str,
        outputs: &Properties,
    ) -> terrace_cloud::Result<()> {
        tracing::info!("Destroying {} '{}' via {}", kind, id, self.config.command);
        let empty = Properties::new();
        let request = self.request(Operation::Destroy, kind, id, &empty, Some(outputs));
        self.call(&request).await?;
        Ok(())
    }

    async fn check_auth(&self) -> terrace_cloud::Result<AuthStatus> {
        let empty = Properties::new();
        let request = self.request(Operation::CheckAuth, "", "", &empty, None);
        match self.call(&request).await {
            Ok(outputs) => {
                let account = outputs
                    .get("account")
                    .and_then(|v| v.as_str())
                    .unwrap_or(self.name.as_str())
                    .to_string();
                Ok(AuthStatus::ok(account))
            }
            Err(ProcessError::CommandNotFound(command)) => Ok(AuthStatus::failed(format!(
                "{command} がインストールされていません"
            ))),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }
}
