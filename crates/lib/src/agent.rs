//! Agent invocation: one external agent call per inbound message, with a hard deadline.

use async_trait::async_trait;
use std::time::Duration;

/// Reply used when the agent produced no output at all.
pub const EMPTY_OUTPUT_REPLY: &str = "The agent finished without producing a reply.";
/// Reply used when the agent process was killed at the deadline.
pub const TIMEOUT_REPLY: &str = "Processing timed out, please try again later.";

/// Outcome of a single agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentResult {
    /// Trimmed reply text (stdout, or stderr when stdout was empty).
    Success(String),
    Timeout,
    /// Non-zero exit or spawn failure; carries the underlying error text.
    ProcessFailure(String),
    EmptyOutput,
}

impl AgentResult {
    /// Text to deliver to the chat for this outcome.
    pub fn reply_text(&self) -> String {
        match self {
            AgentResult::Success(text) => text.clone(),
            AgentResult::Timeout => TIMEOUT_REPLY.to_string(),
            AgentResult::ProcessFailure(detail) => format!("Processing failed: {}", detail),
            AgentResult::EmptyOutput => EMPTY_OUTPUT_REPLY.to_string(),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentResult::Success(_) => "success",
            AgentResult::Timeout => "timeout",
            AgentResult::ProcessFailure(_) => "process_failure",
            AgentResult::EmptyOutput => "empty_output",
        }
    }
}

/// Runs the conversational agent for one message. Implementations never retry.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Run the agent on `message` with an agent-visible budget of `timeout`.
    async fn invoke(&self, message: &str, timeout: Duration) -> AgentResult;
}
