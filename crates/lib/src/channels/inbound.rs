//! Inbound message from the chat webhook: normalized from the provider's JSON payload.

use serde_json::Value;

/// `conversationType` value DingTalk uses for group chats ("1" is a direct chat).
const GROUP_CONVERSATION_TYPE: &str = "2";
/// Spelled-out group marker, accepted alongside the numeric one.
const GROUP_CONVERSATION_LABEL: &str = "group";

/// A plain-text chat message ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Trimmed message text.
    pub content: String,
    pub user_id: String,
    pub chat_id: String,
    pub is_group: bool,
    /// Per-conversation reply URL (`sessionWebhook`), when the provider attaches one.
    pub reply_webhook: Option<String>,
    /// Display name of the sender, for logs only.
    pub sender_nick: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Normalize a raw payload into an [`InboundMessage`].
///
/// Returns `Ok(None)` for anything that is not a plain-text message (images, cards, system
/// events, missing fields). Only a payload that is not a JSON object is an error.
pub fn parse(payload: &Value) -> Result<Option<InboundMessage>, ParseError> {
    let obj = payload.as_object().ok_or_else(|| {
        ParseError::Malformed(format!("expected a JSON object, got {}", kind(payload)))
    })?;

    // `{ header, body }` envelope: the event lives in `body`.
    let event = match obj.get("body").and_then(Value::as_object) {
        Some(body) => body,
        None => obj,
    };

    if let Some(msgtype) = event.get("msgtype") {
        if msgtype.as_str() != Some("text") {
            return Ok(None);
        }
    }

    let Some(text) = event
        .get("text")
        .and_then(|t| t.get("content"))
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };
    let content = text.trim();
    if content.is_empty() {
        return Ok(None);
    }

    let Some(user_id) = str_field(event, "senderStaffId").or_else(|| str_field(event, "senderId"))
    else {
        return Ok(None);
    };
    let Some(chat_id) = str_field(event, "conversationId") else {
        return Ok(None);
    };
    let is_group = matches!(
        event.get("conversationType").and_then(Value::as_str),
        Some(GROUP_CONVERSATION_TYPE) | Some(GROUP_CONVERSATION_LABEL)
    );

    Ok(Some(InboundMessage {
        content: content.to_string(),
        user_id,
        chat_id,
        is_group,
        reply_webhook: str_field(event, "sessionWebhook"),
        sender_nick: str_field(event, "senderNick"),
    }))
}

fn str_field(event: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    event
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
