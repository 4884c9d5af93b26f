//! Integration tests: drive POST /webhook/dingtalk over HTTP with a local capture server
//! standing in for the chat provider's robot webhook.

use async_trait::async_trait;
use axum::{extract::State, routing::post, Json, Router};
use relay::agent::{AgentInvoker, AgentResult};
use relay::channels::WebhookSink;
use relay::config::Config;
use relay::gateway::{self, GatewayState, SIGNATURE_HEADER, TIMESTAMP_HEADER, WEBHOOK_PATH};
use relay::signature;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct CountingInvoker {
    calls: AtomicUsize,
}

#[async_trait]
impl AgentInvoker for CountingInvoker {
    async fn invoke(&self, message: &str, _timeout: Duration) -> AgentResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AgentResult::Success(format!("echo: {}", message))
    }
}

type Captured = Arc<Mutex<Vec<Value>>>;

async fn capture(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
    captured.lock().unwrap().push(body);
    Json(json!({ "errcode": 0, "errmsg": "ok" }))
}

/// Start a server on an ephemeral port; returns its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

struct Harness {
    base: String,
    captured: Captured,
    client: reqwest::Client,
}

impl Harness {
    async fn start(mut config: Config, invoker: Arc<dyn AgentInvoker>) -> Self {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let robot = Router::new()
            .route("/robot/send", post(capture))
            .with_state(captured.clone());
        let robot_base = serve(robot).await;
        config.dingtalk.webhook_url = Some(format!("{}/robot/send", robot_base));

        let sink = Arc::new(WebhookSink::new(Duration::from_secs(5)));
        let state = GatewayState::new(config, invoker, sink);
        let base = serve(gateway::build_router(state)).await;
        Self {
            base,
            captured,
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, body: &Value, headers: &[(&str, &str)]) -> (u16, Value) {
        let mut req = self
            .client
            .post(format!("{}{}", self.base, WEBHOOK_PATH))
            .json(body);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let resp = req.send().await.expect("webhook request");
        let status = resp.status().as_u16();
        (status, resp.json().await.expect("webhook JSON"))
    }

    async fn sessions(&self) -> u64 {
        let status: Value = self
            .client
            .get(format!("{}/status", self.base))
            .send()
            .await
            .expect("status request")
            .json()
            .await
            .expect("status JSON");
        status["sessions"].as_u64().expect("sessions count")
    }

    async fn wait_for_replies(&self, n: usize) -> Vec<Value> {
        for _ in 0..200 {
            let got = self.captured.lock().unwrap().clone();
            if got.len() >= n {
                return got;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("expected {} replies at the robot webhook", n);
    }
}

fn event(content: &str) -> Value {
    json!({
        "msgtype": "text",
        "text": { "content": content },
        "senderStaffId": "u1",
        "conversationId": "c1",
        "conversationType": "2"
    })
}

#[tokio::test]
async fn keyword_mismatch_skips_agent() {
    let invoker = Arc::new(CountingInvoker::default());
    let mut config = Config::default();
    config.dingtalk.keyword = Some("@relay".to_string());
    let h = Harness::start(config, invoker.clone()).await;

    let (code, body) = h.post(&event("just chatting"), &[]).await;
    assert_eq!(code, 200);
    assert_eq!(body, json!({ "status": "keyword_mismatch" }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    assert!(h.captured.lock().unwrap().is_empty());
}

#[tokio::test]
async fn message_round_trip_delivers_reply_and_releases_session() {
    let invoker = Arc::new(CountingInvoker::default());
    let mut config = Config::default();
    config.dingtalk.keyword = Some("@relay".to_string());
    let h = Harness::start(config, invoker.clone()).await;

    let (code, body) = h.post(&event("@relay what time is it"), &[]).await;
    assert_eq!(code, 200);
    assert_eq!(body, json!({ "status": "ok" }));

    let replies = h.wait_for_replies(1).await;
    assert_eq!(
        replies[0],
        json!({ "msgtype": "text", "text": { "content": "echo: @relay what time is it" } })
    );
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    // The lease is dropped right after delivery.
    for _ in 0..40 {
        if h.sessions().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(h.sessions().await, 0);
}

#[tokio::test]
async fn ignored_and_malformed_payloads() {
    let invoker = Arc::new(CountingInvoker::default());
    let h = Harness::start(Config::default(), invoker.clone()).await;

    let (code, body) = h.post(&json!({ "msgtype": "picture" }), &[]).await;
    assert_eq!(code, 200);
    assert_eq!(body, json!({ "status": "ignored" }));

    let (code, body) = h.post(&json!([1, 2, 3]), &[]).await;
    assert_eq!(code, 500);
    assert!(body.get("error").is_some());

    let resp = h
        .client
        .post(format!("{}{}", h.base, WEBHOOK_PATH))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("webhook request");
    assert_eq!(resp.status().as_u16(), 500);

    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn signature_is_enforced_when_headers_present() {
    let invoker = Arc::new(CountingInvoker::default());
    let mut config = Config::default();
    config.dingtalk.sign_secret = Some("abc".to_string());
    let h = Harness::start(config, invoker.clone()).await;

    let (code, body) = h
        .post(
            &event("hi"),
            &[(TIMESTAMP_HEADER, "1000"), (SIGNATURE_HEADER, "forged")],
        )
        .await;
    assert_eq!(code, 401);
    assert!(body.get("error").is_some());

    let good = signature::sign("1000", "abc");
    let (code, body) = h
        .post(
            &event("hi"),
            &[(TIMESTAMP_HEADER, "1000"), (SIGNATURE_HEADER, good.as_str())],
        )
        .await;
    assert_eq!(code, 200);
    assert_eq!(body["status"], "ok");

    h.wait_for_replies(1).await;
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_signature_header_is_rejected() {
    let invoker = Arc::new(CountingInvoker::default());
    let mut config = Config::default();
    config.dingtalk.sign_secret = Some("abc".to_string());
    let h = Harness::start(config, invoker.clone()).await;

    let (code, body) = h
        .post(
            &event("hi"),
            &[(TIMESTAMP_HEADER, "1000"), (SIGNATURE_HEADER, "")],
        )
        .await;
    assert_eq!(code, 401);
    assert_eq!(body, json!({ "error": "invalid signature" }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn forged_signature_is_rejected_before_body_is_read() {
    let invoker = Arc::new(CountingInvoker::default());
    let mut config = Config::default();
    config.dingtalk.sign_secret = Some("abc".to_string());
    let h = Harness::start(config, invoker.clone()).await;

    for body in ["{not json", "null", ""] {
        let resp = h
            .client
            .post(format!("{}{}", h.base, WEBHOOK_PATH))
            .header("content-type", "application/json")
            .header(TIMESTAMP_HEADER, "1000")
            .header(SIGNATURE_HEADER, "forged")
            .body(body)
            .send()
            .await
            .expect("webhook request");
        assert_eq!(resp.status().as_u16(), 401, "body {:?}", body);
        let json: Value = resp.json().await.expect("webhook JSON");
        assert_eq!(json, json!({ "error": "invalid signature" }));
    }

    // A correctly signed but unparseable body is still malformed.
    let good = signature::sign("1000", "abc");
    let resp = h
        .client
        .post(format!("{}{}", h.base, WEBHOOK_PATH))
        .header("content-type", "application/json")
        .header(TIMESTAMP_HEADER, "1000")
        .header(SIGNATURE_HEADER, good.as_str())
        .body("{not json")
        .send()
        .await
        .expect("webhook request");
    assert_eq!(resp.status().as_u16(), 500);
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn process_agent_round_trip() {
    use relay::exec::ProcessInvoker;

    let invoker = Arc::new(ProcessInvoker::new(
        "sh",
        vec!["-c".to_string(), "printf 'agent says: %s' \"$0\"".to_string()],
    ));
    let h = Harness::start(Config::default(), invoker).await;

    let (code, _) = h.post(&event("quote \" inside"), &[]).await;
    assert_eq!(code, 200);
    let replies = h.wait_for_replies(1).await;
    assert_eq!(replies[0]["text"]["content"], "agent says: quote \" inside");
}
