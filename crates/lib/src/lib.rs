//! Relay core library: chat webhook intake, per-conversation session coordination, agent
//! process invocation and reply delivery. Used by the `relay` CLI.

pub mod agent;
pub mod channels;
pub mod config;
pub mod dispatch;
pub mod exec;
pub mod gateway;
pub mod session;
pub mod signature;
