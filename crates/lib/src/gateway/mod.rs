//! Gateway: HTTP intake for chat webhook events.
//!
//! Single port serves the provider webhook plus health and status probes. The webhook is
//! acknowledged before the agent runs; replies go out through the chat sink.

mod server;

pub use server::{
    build_router, run_gateway, GatewayState, SIGNATURE_HEADER, TIMESTAMP_HEADER, WEBHOOK_PATH,
};
