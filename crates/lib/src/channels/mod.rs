//! Chat channel plumbing.
//!
//! Inbound payloads are normalized into [`InboundMessage`]; replies leave through a
//! [`ChatSink`]. The DingTalk robot webhook is the only provider.

mod dingtalk;
mod inbound;
mod sink;

pub use dingtalk::{text_payload, WebhookSink};
pub use inbound::{parse, InboundMessage, ParseError};
pub use sink::ChatSink;
