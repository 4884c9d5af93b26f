//! Per-event dispatch: verify, parse, filter, then hand off to a detached pipeline that
//! acquires the session, runs the agent, delivers the reply and releases the session.
//!
//! The synchronous part ([`DispatchController::screen`]) decides the webhook response. The
//! pipeline ([`DispatchController::spawn`]) runs after that response and can never change it.

use crate::agent::AgentInvoker;
use crate::channels::{self, ChatSink, InboundMessage, ParseError};
use crate::config::Config;
use crate::session::{SessionKey, SessionRegistry};
use crate::signature;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Sent instead of a second invocation while the sender's previous message is in flight.
pub const WAIT_NOTICE: &str = "Still working on your previous message, please wait.";
/// Sent when the pipeline itself crashes.
pub const APOLOGY_REPLY: &str = "Sorry, something went wrong while handling your message.";

/// Signature headers from the inbound request. Both must be present for verification to run.
#[derive(Debug, Clone, Default)]
pub struct SignatureHeaders {
    pub timestamp: Option<String>,
    pub signature: Option<String>,
}

/// Result of the synchronous phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Respond "ok" and spawn the pipeline for this message.
    Accepted(InboundMessage),
    /// Not a plain-text message.
    Ignored,
    /// Keyword filter is set and the text does not contain it.
    KeywordMismatch,
}

impl Disposition {
    /// `status` value of the webhook response body.
    pub fn status(&self) -> &'static str {
        match self {
            Disposition::Accepted(_) => "ok",
            Disposition::Ignored => "ignored",
            Disposition::KeywordMismatch => "keyword_mismatch",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("signature verification failed")]
    AuthRejected,
    #[error(transparent)]
    Malformed(#[from] ParseError),
}

/// The subset of config the controller reads.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    pub sign_secret: Option<String>,
    pub keyword: Option<String>,
    /// Configured outbound webhook; replies fall back to the message's own reply URL without it.
    pub webhook_url: Option<String>,
    pub agent_timeout: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sign_secret: config.sign_secret().map(String::from),
            keyword: config.keyword().map(String::from),
            webhook_url: config.webhook_url().map(String::from),
            agent_timeout: config.agent.timeout(),
        }
    }
}

/// Orchestrates verification, parsing, session coordination, agent invocation and delivery.
pub struct DispatchController {
    settings: DispatchSettings,
    registry: Arc<SessionRegistry>,
    invoker: Arc<dyn AgentInvoker>,
    sink: Arc<dyn ChatSink>,
}

impl DispatchController {
    pub fn new(
        settings: DispatchSettings,
        registry: Arc<SessionRegistry>,
        invoker: Arc<dyn AgentInvoker>,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            settings,
            registry,
            invoker,
            sink,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Synchronous phase: signature, parse, keyword filter.
    pub fn screen(
        &self,
        headers: &SignatureHeaders,
        payload: &Value,
    ) -> Result<Disposition, DispatchError> {
        self.authenticate(headers)?;
        self.classify(payload)
    }

    /// Signature check on the headers alone. Runs before the body is decoded, so a forged
    /// request is rejected whatever its body holds. An empty header still counts as present.
    pub fn authenticate(&self, headers: &SignatureHeaders) -> Result<(), DispatchError> {
        if let (Some(ts), Some(sig), Some(secret)) = (
            headers.timestamp.as_deref(),
            headers.signature.as_deref(),
            self.settings.sign_secret.as_deref(),
        ) {
            if !signature::verify(ts, sig, secret) {
                log::warn!("dispatch: rejected request with bad signature (timestamp {:?})", ts);
                return Err(DispatchError::AuthRejected);
            }
        }
        Ok(())
    }

    /// Parse and keyword filter for an authenticated payload.
    pub fn classify(&self, payload: &Value) -> Result<Disposition, DispatchError> {
        let Some(msg) = channels::parse(payload)? else {
            log::debug!("dispatch: ignoring non-text payload");
            return Ok(Disposition::Ignored);
        };

        if let Some(keyword) = self.settings.keyword.as_deref() {
            if !msg.content.contains(keyword) {
                log::debug!("dispatch: message from {} lacks keyword", msg.user_id);
                return Ok(Disposition::KeywordMismatch);
            }
        }
        Ok(Disposition::Accepted(msg))
    }

    /// Spawn the detached pipeline for an accepted message. A panic inside the pipeline is
    /// logged and answered with [`APOLOGY_REPLY`]; the session is released either way.
    pub fn spawn(self: &Arc<Self>, msg: InboundMessage) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let run_id = format!("run-{}", uuid::Uuid::new_v4());
            let destination = controller.destination(&msg).map(String::from);
            let inner = {
                let controller = Arc::clone(&controller);
                let run_id = run_id.clone();
                tokio::spawn(async move { controller.process(&run_id, msg).await })
            };
            if let Err(e) = inner.await {
                log::error!("dispatch[{}]: pipeline failed: {}", run_id, e);
                if !controller
                    .sink
                    .deliver(destination.as_deref(), APOLOGY_REPLY)
                    .await
                {
                    log::warn!("dispatch[{}]: apology was not delivered", run_id);
                }
            }
        })
    }

    /// Acquire, invoke, deliver, release.
    async fn process(&self, run_id: &str, msg: InboundMessage) {
        let key = SessionKey::new(msg.chat_id.as_str(), msg.user_id.as_str());
        let destination = self.destination(&msg);

        let Some(lease) = self.registry.try_lease(key.clone()) else {
            log::info!("dispatch[{}]: {} already in flight, sending wait notice", run_id, key);
            if !self.sink.deliver(destination, WAIT_NOTICE).await {
                log::warn!("dispatch[{}]: wait notice for {} was not delivered", run_id, key);
            }
            return;
        };

        log::info!(
            "dispatch[{}]: invoking agent for {} ({}{})",
            run_id,
            key,
            msg.sender_nick.as_deref().unwrap_or("unknown sender"),
            if msg.is_group { ", group" } else { "" }
        );
        log::debug!("dispatch[{}]: message: {}", run_id, preview(&msg.content, 80));

        let result = self
            .invoker
            .invoke(&msg.content, self.settings.agent_timeout)
            .await;
        log::info!("dispatch[{}]: agent finished: {}", run_id, result.kind());

        if !self.sink.deliver(destination, &result.reply_text()).await {
            log::warn!("dispatch[{}]: reply for {} was not delivered", run_id, lease.key());
        }
        drop(lease);
    }

    fn destination<'a>(&'a self, msg: &'a InboundMessage) -> Option<&'a str> {
        self.settings
            .webhook_url
            .as_deref()
            .or(msg.reply_webhook.as_deref())
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}
