//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and then overridden by
//! environment variables. Every field has a default so a missing file is a valid setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Chat provider settings (signing secret, outbound webhook, keyword filter).
    #[serde(default)]
    pub dingtalk: DingTalkConfig,

    /// External agent process settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// In-flight session bookkeeping.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Outbound delivery settings.
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Bind address and port for the webhook listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port (default 3000). Overridden by PORT env.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the chat provider must reach it). Overridden by RELAY_BIND env.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_port() -> u16 {
    3000
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Chat provider config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DingTalkConfig {
    /// Shared secret for inbound signature checks. Unset disables verification. Overridden by DINGTALK_SIGN_SECRET env.
    pub sign_secret: Option<String>,
    /// Outbound robot webhook URL for replies. Overridden by DINGTALK_WEBHOOK_URL env.
    pub webhook_url: Option<String>,
    /// When set, only messages containing this text are forwarded. Overridden by RELAY_KEYWORD env.
    pub keyword: Option<String>,
}

/// External agent process config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Executable path or name on PATH (default "claude"). Overridden by AGENT_COMMAND env.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Arguments placed before the message argument (default `["-p"]`).
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Agent-visible time budget in seconds (default 120). Overridden by AGENT_TIMEOUT_SECS env.
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra seconds past the budget before the process is killed (default 10).
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    /// Working directory for the agent process. Defaults to the relay's own.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_agent_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_kill_grace_secs() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            timeout_secs: default_agent_timeout_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            working_dir: None,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// Budget plus grace: the longest an agent process can run.
    pub fn kill_deadline(&self) -> Duration {
        self.timeout().saturating_add(self.kill_grace())
    }
}

/// Session bookkeeping config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsConfig {
    /// Entries older than this are swept; also the sweep interval (default 300).
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    300
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl SessionsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Outbound delivery config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    /// Per-request timeout for the outbound POST (default 10).
    #[serde(default = "default_sink_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sink_timeout_secs() -> u64 {
    10
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_sink_timeout_secs(),
        }
    }
}

/// Trim and drop empty values so `FOO=""` behaves like an unset variable.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Signing secret, if set and non-empty.
    pub fn sign_secret(&self) -> Option<&str> {
        self.dingtalk
            .sign_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Outbound webhook URL, if set and non-empty.
    pub fn webhook_url(&self) -> Option<&str> {
        self.dingtalk
            .webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Session TTL actually enforced. A sweep must never remove an entry whose agent can still be
    /// running, so the configured TTL is raised to cover the kill deadline plus one delivery.
    pub fn session_ttl(&self) -> Duration {
        let floor = self
            .agent
            .kill_deadline()
            .saturating_add(Duration::from_secs(self.sink.timeout_secs));
        self.sessions.ttl().max(floor)
    }

    /// Required keyword, if set and non-empty.
    pub fn keyword(&self) -> Option<&str> {
        self.dingtalk
            .keyword
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Apply environment overrides from the process environment.
pub fn apply_env(config: &mut Config) {
    apply_env_from(config, |key| std::env::var(key).ok());
}

/// Apply environment overrides using `lookup` to read variables. Env values win over the file.
pub fn apply_env_from<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = non_empty(lookup("PORT")) {
        match port.parse() {
            Ok(p) => config.server.port = p,
            Err(_) => log::warn!("ignoring invalid PORT value: {}", port),
        }
    }
    if let Some(bind) = non_empty(lookup("RELAY_BIND")) {
        config.server.bind = bind;
    }
    if let Some(secret) = non_empty(lookup("DINGTALK_SIGN_SECRET")) {
        config.dingtalk.sign_secret = Some(secret);
    }
    if let Some(url) = non_empty(lookup("DINGTALK_WEBHOOK_URL")) {
        config.dingtalk.webhook_url = Some(url);
    }
    if let Some(keyword) = non_empty(lookup("RELAY_KEYWORD")) {
        config.dingtalk.keyword = Some(keyword);
    }
    if let Some(command) = non_empty(lookup("AGENT_COMMAND")) {
        config.agent.command = command;
    }
    if let Some(secs) = non_empty(lookup("AGENT_TIMEOUT_SECS")) {
        match secs.parse() {
            Ok(s) => config.agent.timeout_secs = s,
            Err(_) => log::warn!("ignoring invalid AGENT_TIMEOUT_SECS value: {}", secs),
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default path), then apply env overrides.
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = read_config_file(&path)?;
    apply_env(&mut config);
    Ok((config, path))
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

/// Write a default config file (pretty JSON) if none exists. Returns true when a file was written.
pub fn init_config_file(path: &Path) -> Result<bool> {
    if path.exists() {
        log::debug!("config already exists at {}, skipping", path.display());
        return Ok(false);
    }
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(&Config::default())
        .context("serializing default config")?;
    std::fs::write(path, json)
        .with_context(|| format!("writing default config to {}", path.display()))?;
    log::info!("created default config at {}", path.display());
    Ok(true)
}
