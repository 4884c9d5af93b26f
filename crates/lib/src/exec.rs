//! Process execution for the agent: no shell is used; the message is passed as its own
//! argument so quoting inside it cannot change the command line.

use crate::agent::{AgentInvoker, AgentResult};
use crate::config::AgentConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Environment variable carrying the agent-visible budget (whole seconds) to the child.
pub const TIMEOUT_ENV: &str = "RELAY_AGENT_TIMEOUT_SECS";

/// Invokes the agent as `command args... <message>`.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    command: String,
    args: Vec<String>,
    kill_grace: Duration,
    working_dir: Option<PathBuf>,
}

impl ProcessInvoker {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            kill_grace: Duration::ZERO,
            working_dir: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            kill_grace: config.kill_grace(),
            working_dir: config.working_dir.clone(),
        }
    }

    /// Time allowed past the agent budget before the process is killed.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn command(&self, message: &str, timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .arg(message)
            .env(TIMEOUT_ENV, timeout.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl AgentInvoker for ProcessInvoker {
    async fn invoke(&self, message: &str, timeout: Duration) -> AgentResult {
        let child = match self.command(message, timeout).spawn() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("agent: spawning {} failed: {}", self.command, e);
                return AgentResult::ProcessFailure(format!("failed to start agent: {}", e));
            }
        };
        let deadline = timeout.saturating_add(self.kill_grace);
        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                log::warn!("agent: waiting for {} failed: {}", self.command, e);
                return AgentResult::ProcessFailure(e.to_string());
            }
            Err(_) => {
                log::warn!("agent: killed after {:?}", deadline);
                return AgentResult::Timeout;
            }
        };
        classify_output(output.status, &output.stdout, &output.stderr)
    }
}

fn classify_output(status: std::process::ExitStatus, stdout: &[u8], stderr: &[u8]) -> AgentResult {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    if !status.success() {
        let detail = if stderr.is_empty() {
            format!("agent exited with {}", status)
        } else {
            stderr.to_string()
        };
        return AgentResult::ProcessFailure(detail);
    }
    if !stdout.is_empty() {
        AgentResult::Success(stdout.to_string())
    } else if !stderr.is_empty() {
        AgentResult::Success(stderr.to_string())
    } else {
        AgentResult::EmptyOutput
    }
}
