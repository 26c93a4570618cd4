//! facnet - headless multiplayer client
//!
//! Connects to a game server, joins as a player and logs what happens.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::{AppConfig, DEFAULT_CONFIG_PATH};
use facnet_client::{Client, ClientError, ClientEvent};
use facnet_net::{Frame, Message, MessageCodec, Received, DEFAULT_MAX_FRAGMENT_PAYLOAD};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless multiplayer client", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a server and stay until interrupted
    Connect {
        /// Server address as host:port; defaults to the configured server
        server: Option<String>,
        /// Player name
        #[arg(long)]
        name: Option<String>,
        /// Server password
        #[arg(long)]
        password: Option<String>,
    },
    /// Decode one datagram given as hex
    Decode {
        /// Datagram bytes
        hex: String,
    },
    /// Write the effective configuration to a file
    Config {
        /// Destination path
        #[arg(long)]
        write: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut app = AppConfig::load_from_path(&args.config);
    match args.command {
        Command::Connect {
            server,
            name,
            password,
        } => {
            if let Some(name) = name {
                app.client.player_name = name;
            }
            if let Some(password) = password {
                app.client.password = password;
            }
            let Some(server) = server.or(app.server.clone()) else {
                bail!("no server given and none configured in {}", args.config.display());
            };
            connect(app, &server).await
        }
        Command::Decode { hex } => decode(&hex),
        Command::Config { write } => {
            app.save_to_path(&write)
                .with_context(|| format!("failed to write {}", write.display()))?;
            info!("Wrote configuration to {}", write.display());
            Ok(())
        }
    }
}

async fn connect(app: AppConfig, server: &str) -> Result<()> {
    info!("Starting facnet v{}", env!("CARGO_PKG_VERSION"));
    let addr = tokio::net::lookup_host(server)
        .await
        .with_context(|| format!("failed to resolve {server}"))?
        .next()
        .with_context(|| format!("{server} resolved to no address"))?;

    let (mut client, events) = Client::new(app.client);
    let logger = tokio::spawn(log_events(events));

    let joined = tokio::select! {
        joined = client.connect(addr) => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match joined {
        Some(Ok(player_index)) => {
            info!("Playing as player {}; press Ctrl-C to leave", player_index);
            tokio::select! {
                ended = client.run() => Some(ended),
                _ = tokio::signal::ctrl_c() => None,
            }
        }
        Some(Err(err)) => Some(Err(err)),
        None => None,
    };
    client.close();
    drop(client);
    let _ = logger.await;

    match outcome {
        None => {
            info!("Interrupted, left the game");
            Ok(())
        }
        Some(Err(ClientError::Disconnected { reason })) => {
            warn!("Server ended the session: {}", reason);
            Ok(())
        }
        Some(Err(err)) => Err(err).context("session failed"),
        Some(Ok(())) => Ok(()),
    }
}

async fn log_events(mut events: UnboundedReceiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::StateChanged(state) => info!("State: {}", state),
            ClientEvent::JoinedGame { player_index } => info!("Joined as player {}", player_index),
            ClientEvent::Tick(tick) => trace!("Tick {}", tick),
            ClientEvent::InputAction(action) => {
                debug!("Input action {:?} from player {}", action.ty, action.player_index)
            }
            ClientEvent::SynchronizerAction(action) => {
                debug!("Synchronizer action {} (peer {:?})", action.action_type(), action.peer_id)
            }
            ClientEvent::Malformed(err) => warn!("Malformed datagram: {}", err),
            ClientEvent::Error(err) => warn!("Client error: {}", err),
            ClientEvent::Closed => break,
            _ => {}
        }
    }
}

fn decode(hex: &str) -> Result<()> {
    let bytes = parse_hex(hex)?;
    let frame = Frame::decode(&bytes).context("invalid frame")?;
    println!("{frame:#?}");

    let mut codec = MessageCodec::new(DEFAULT_MAX_FRAGMENT_PAYLOAD);
    match codec.handle_datagram(&bytes) {
        Some(Received::Message(message)) => print_message(&message),
        Some(Received::Malformed(err)) => bail!("invalid message body: {err}"),
        None => println!("fragment {} of message {}, body incomplete", frame.fragment_number, frame.message_id),
    }
    Ok(())
}

fn print_message(message: &Message) {
    println!("{} message:", message.message_type());
    println!("{message:#?}");
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex byte {pair:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("02 ff:10").unwrap(), vec![0x02, 0xff, 0x10]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_cli_parses_connect() {
        let args = Args::try_parse_from([
            "facnet", "--verbose", "connect", "localhost:34197", "--name", "alice",
        ])
        .unwrap();
        assert!(args.verbose);
        match args.command {
            Command::Connect { server, name, .. } => {
                assert_eq!(server.as_deref(), Some("localhost:34197"));
                assert_eq!(name.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
