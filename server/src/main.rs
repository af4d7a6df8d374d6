use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::session::SessionTimings;
use std::net::IpAddr;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Seconds between the second player joining and the game running
    #[arg(long, default_value = "3")]
    start_delay_secs: u64,
    /// Seconds a game may run before it is finished automatically
    #[arg(long, default_value = "600")]
    run_timeout_secs: u64,
    /// Seconds a finished game is shown before the lobby resets
    #[arg(long, default_value = "30")]
    finish_delay_secs: u64,
    /// Outbound messages buffered per client
    #[arg(long, default_value = "64")]
    send_queue: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            timings: SessionTimings {
                start_delay: Duration::from_secs(self.start_delay_secs),
                run_timeout: Duration::from_secs(self.run_timeout_secs),
                finish_delay: Duration::from_secs(self.finish_delay_secs),
            },
            send_queue: self.send_queue,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let server = server::network::start(config).await?;

    info!("Lobby available at ws://localhost:{}", server.port());

    tokio::select! {
        _ = server.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
