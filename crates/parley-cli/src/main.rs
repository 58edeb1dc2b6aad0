//! Parley CLI
//!
//! Serverless peer-to-peer chat rooms.

mod config;
mod nickname;
mod repl;
mod transcript;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use config::Config;
use parley_core::ChatSession;
use parley_discovery::EndpointResolver;
use repl::{Command, Flow, Repl};

/// Legacy `KEY=VALUE` file picked up from the working directory.
const LEGACY_CONFIG_FILE: &str = "config";

/// Parley - serverless peer-to-peer chat
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (`.toml`, or legacy KEY=VALUE otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port for chat frames
    #[arg(long)]
    tcp_port: Option<u16>,

    /// UDP port for LAN announcements
    #[arg(long)]
    udp_port: Option<u16>,

    /// Nickname to use
    #[arg(short, long)]
    nickname: Option<String>,

    /// Never act as a relay
    #[arg(long)]
    no_supernode: bool,

    /// Skip STUN and advertise the local address
    #[arg(long)]
    no_stun: bool,

    /// Disable LAN broadcast discovery
    #[arg(long)]
    no_lan: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a room, then chat
    Create {
        /// Room ID
        room: String,
    },

    /// Join a room, then chat
    Join {
        /// Room ID
        room: String,

        /// Base64 room key
        key: String,
    },

    /// Print the public endpoint reported by STUN and exit
    Resolve,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None if PathBuf::from(LEGACY_CONFIG_FILE).is_file() => Config::load(LEGACY_CONFIG_FILE)?,
        None => Config::load_or_default()?,
    };

    if let Some(port) = cli.tcp_port {
        config.network.tcp_port = port;
    }
    if let Some(port) = cli.udp_port {
        config.network.udp_port = port;
    }
    if let Some(name) = &cli.nickname {
        config.node.nickname = Some(name.clone());
    }
    if cli.no_supernode {
        config.relay.opt_out = true;
    }
    if cli.no_stun {
        config.discovery.stun = false;
    }
    if cli.no_lan {
        config.discovery.lan = false;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let chat_config = Arc::new(config.to_chat_config()?);

    if let Some(Commands::Resolve) = cli.command {
        let endpoint = EndpointResolver::new(
            chat_config.nat.stun_servers.clone(),
            chat_config.nat.stun_timeout,
            chat_config.tcp_port,
        )
        .resolve_public_endpoint()
        .await;
        println!("Public endpoint: {endpoint}");
        return Ok(());
    }

    let nickname = nickname::pick(&chat_config, &mut rand::thread_rng());
    let (session, mut events) = ChatSession::start(Arc::clone(&chat_config), nickname).await?;

    println!("Parley {} started!", env!("CARGO_PKG_VERSION"));
    repl::print_help();

    let mut repl = Repl::new(session.clone(), std::env::current_dir()?);
    let initial = match cli.command {
        Some(Commands::Create { room }) => Some(Command::Create(room)),
        Some(Commands::Join { room, key }) => Some(Command::Join { room, key }),
        _ => None,
    };
    if let Some(command) = initial {
        repl.execute(command).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match repl::parse(&line) {
                    Ok(command) => match repl.execute(command).await {
                        Ok(Flow::Exit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => println!("Error: {e}"),
                    },
                    Err(e) => println!("{e}"),
                }
            }
            Some(event) = events.recv() => repl.show_event(event),
            _ = &mut ctrl_c => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    session.shutdown().await;
    // Let the farewell announcement and pending sends drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
