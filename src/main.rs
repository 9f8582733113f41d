use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};

use relay_client::{ClientChannelManager, ClientEvent, ReconnectPolicy, WsConnector};
use relay_core::engine::ReplyEngine;
use relay_core::ids::Identity;
use relay_core::settings::{load_settings, RelaySettings};
use relay_engine::{EchoEngine, ReliableConfig, ReliableEngine};
use relay_server::{AppState, ServerConfig};
use relay_session::grant::{GrantCapabilities, GrantIssuer};
use relay_session::transport_for_host;
use relay_telemetry::{init_telemetry, LogFormat, TelemetryConfig};

/// Relay between client WebSockets and real-time session rooms.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about, long_about = None)]
struct Args {
    /// JSON settings file, merged under `RELAY_` environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Interactive client: stdin lines go out, replies are printed.
    Chat {
        #[arg(long, default_value = "ws://127.0.0.1:8000/ws")]
        url: String,
    },
    /// Print a session grant for an identity.
    Token {
        #[arg(long)]
        identity: String,
        #[arg(long)]
        room: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_telemetry(&TelemetryConfig {
        log_level: args.log_level.into(),
        module_levels: Vec::new(),
        format: if args.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        },
    })
    .context("Failed to initialize logging")?;

    let settings = load_settings(args.config.as_deref()).context("Failed to load settings")?;

    match args.command {
        Command::Serve { port } => serve(settings, port).await,
        Command::Chat { url } => chat(settings, url).await,
        Command::Token { identity, room } => token(settings, identity, room),
    }
}

async fn serve(mut settings: RelaySettings, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }
    tracing::info!(transport = %settings.transport.host, room = %settings.relay.room, "starting relay");

    let transport = transport_for_host(
        &settings.transport.host,
        settings.transport.credentials().ok(),
    )
    .context("Failed to select session transport")?;
    let state = AppState::new(&settings, transport, build_engine(&settings));
    let handle = relay_server::start(ServerConfig::from(&settings), state)
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn build_engine(settings: &RelaySettings) -> Arc<dyn ReplyEngine> {
    let echo = EchoEngine::new(settings.engine.reply_prefix.clone());
    if settings.engine.max_retries == 0 {
        return Arc::new(echo);
    }
    Arc::new(ReliableEngine::new(
        echo,
        ReliableConfig {
            max_retries: settings.engine.max_retries,
            ..Default::default()
        },
    ))
}

async fn chat(settings: RelaySettings, url: String) -> Result<()> {
    let policy = ReconnectPolicy::from(&settings.reconnect);
    let (manager, mut events) = ClientChannelManager::start(WsConnector::new(url.clone()), policy);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("connecting to {url}; type a message, or /reload to reconnect");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    manager.close();
                    break;
                };
                match line.trim() {
                    "" => {}
                    "/reload" => manager.reinitialize(),
                    text => {
                        if let Err(err) = manager.send(text).await {
                            eprintln!("not sent: {err}");
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Some(ClientEvent::Message(text)) => println!("{text}"),
                Some(ClientEvent::Connected) => println!("connected"),
                Some(ClientEvent::Disconnected { code, reason }) => {
                    println!("disconnected ({}) {reason}", code.map_or("-".into(), |c| c.to_string()));
                }
                Some(ClientEvent::ConnectFailed(err)) => eprintln!("{err}"),
                Some(ClientEvent::ReconnectScheduled { attempt, delay }) => {
                    println!("reconnecting in {}s (attempt {attempt})", delay.as_secs());
                }
                Some(ClientEvent::GaveUp { attempts }) => {
                    println!("gave up after {attempts} attempts; type /reload to try again");
                }
                None => break,
            },
        }
    }

    // Let the close frame go out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

fn token(settings: RelaySettings, identity: String, room: Option<String>) -> Result<()> {
    let issuer = GrantIssuer::new(
        settings.transport.credentials(),
        Duration::from_secs(settings.transport.grant_ttl_secs),
    );
    let room = room.unwrap_or_else(|| settings.relay.room.clone());
    let grant = issuer
        .issue(&Identity::new(identity), &room, GrantCapabilities::default())
        .context("Failed to issue grant")?;
    println!("{}", grant.as_str());
    Ok(())
}
