use clap::Parser;
use client::sync::{Participation, ReconnectPolicy, SyncAgent};
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lobby server WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3001")]
    server: String,

    /// Join as a player with this name
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Country code shown next to the name
    #[arg(short = 'f', long)]
    flag: Option<String>,

    /// Watch as a spectator instead of playing
    #[arg(long)]
    spectate: bool,

    /// Seconds to wait before reconnecting
    #[arg(long, default_value = "3")]
    reconnect_delay_secs: u64,

    /// Give up after this many consecutive failed connection attempts
    #[arg(long)]
    max_reconnects: Option<u32>,
}

impl Args {
    fn participation(&self) -> Participation {
        if self.spectate {
            Participation::Spectator {
                name: self.name.clone(),
                flag: self.flag.clone(),
            }
        } else if let Some(name) = &self.name {
            Participation::Player {
                name: name.clone(),
                flag: self.flag.clone(),
            }
        } else {
            Participation::Watch
        }
    }

    fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: Duration::from_secs(self.reconnect_delay_secs),
            max_attempts: self.max_reconnects,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    info!("Press Ctrl+C to leave");

    let mut agent = SyncAgent::new(args.server.clone(), args.participation(), args.policy())
        .print_updates(true);

    agent
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
