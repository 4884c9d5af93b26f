//! DingTalk robot webhook: send text replies by POSTing to the robot URL.

use crate::channels::sink::ChatSink;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Robot API reply body. `errcode` is 0 on success.
#[derive(Debug, Deserialize)]
struct RobotResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Build the outbound text message body.
pub fn text_payload(text: &str) -> serde_json::Value {
    serde_json::json!({
        "msgtype": "text",
        "text": { "content": text }
    })
}

/// Outbound sink that POSTs `{msgtype:"text"}` payloads to a robot webhook URL.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("dingtalk: building http client with timeout failed, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self { client }
    }

    /// POST the text payload once. Errors carry the status or the robot's errmsg.
    pub async fn send_text(&self, url: &str, text: &str) -> Result<(), String> {
        let res = self
            .client
            .post(url)
            .json(&text_payload(text))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("send failed: {} {}", status, body));
        }
        let body = res.text().await.unwrap_or_default();
        if let Ok(reply) = serde_json::from_str::<RobotResponse>(&body) {
            if reply.errcode != 0 {
                return Err(format!("robot error {}: {}", reply.errcode, reply.errmsg));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChatSink for WebhookSink {
    async fn deliver(&self, destination: Option<&str>, text: &str) -> bool {
        let Some(url) = destination.map(str::trim).filter(|u| !u.is_empty()) else {
            log::warn!("dingtalk: no outbound webhook configured, dropping reply");
            return false;
        };
        match self.send_text(url, text).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("dingtalk: delivery failed: {}", e);
                false
            }
        }
    }
}
