//! Outbound side of a channel: best-effort text delivery.

use async_trait::async_trait;

/// Delivers text to a chat destination. Single attempt, no queueing.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Send `text` to `destination`. Returns false (after logging) when there is no destination
    /// or the transport fails. Never panics to the caller.
    async fn deliver(&self, destination: Option<&str>, text: &str) -> bool;
}
