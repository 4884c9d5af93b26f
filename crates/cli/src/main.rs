use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Relay chat webhook messages to a command-line agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Write a default config file if none exists.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway: accept webhook events, run the agent, post replies.
    Serve {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Listening port (default from PORT, config, or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Print the resolved configuration with secrets masked.
    Check {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Post a simulated text event to a running gateway and print its response.
    Send {
        /// Message text.
        text: String,

        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Sender id.
        #[arg(long, default_value = "local-user")]
        user: String,

        /// Conversation id.
        #[arg(long, default_value = "local-chat")]
        chat: String,

        /// Mark the conversation as a group chat.
        #[arg(long)]
        group: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = run_check(config) {
                log::error!("check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Send {
            text,
            config,
            user,
            chat,
            group,
        }) => {
            if let Err(e) = run_send(config, text, user, chat, group).await {
                log::error!("send failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(relay::config::default_config_path);
    if relay::config::init_config_file(&path)? {
        println!("wrote default configuration to {}", path.display());
    } else {
        println!("configuration already exists at {}", path.display());
    }
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.server.bind,
        config.server.port,
        path.display()
    );
    relay::gateway::run_gateway(config).await
}

fn mask(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "(set)"
    } else {
        "(unset)"
    }
}

fn run_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    println!("config file:      {}", path.display());
    println!("listen:           {}:{}", config.server.bind, config.server.port);
    println!("sign secret:      {}", mask(config.sign_secret()));
    println!("outbound webhook: {}", mask(config.webhook_url()));
    println!("keyword:          {}", config.keyword().unwrap_or("(none)"));
    println!("agent:            {} {:?}", config.agent.command, config.agent.args);
    println!(
        "agent timeout:    {}s (+{}s grace)",
        config.agent.timeout_secs, config.agent.kill_grace_secs
    );
    println!("session ttl:      {}s", config.sessions.ttl_secs);
    Ok(())
}

async fn run_send(
    config_path: Option<PathBuf>,
    text: String,
    user: String,
    chat: String,
    group: bool,
) -> anyhow::Result<()> {
    let (config, _) = relay::config::load_config(config_path)?;
    let host = match config.server.bind.trim() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    let url = format!(
        "http://{}:{}{}",
        host,
        config.server.port,
        relay::gateway::WEBHOOK_PATH
    );
    let conversation_type = if group { "2" } else { "1" };
    let body = serde_json::json!({
        "msgtype": "text",
        "text": { "content": text },
        "senderStaffId": user,
        "conversationId": chat,
        "conversationType": conversation_type,
    });

    let mut req = reqwest::Client::new().post(&url).json(&body);
    if let Some(secret) = config.sign_secret() {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
            .to_string();
        let sign = relay::signature::sign(&timestamp, secret);
        req = req
            .header(relay::gateway::TIMESTAMP_HEADER, timestamp)
            .header(relay::gateway::SIGNATURE_HEADER, sign);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let text = resp.text().await?;
    println!("{} {}", status.as_u16(), text);
    if !status.is_success() {
        anyhow::bail!("gateway returned {}", status);
    }
    Ok(())
}
