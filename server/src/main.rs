use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::network::Server;
use shared::{levels, DEFAULT_PORT};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Tick rate (updates per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,
    /// Maximum number of connected clients
    #[arg(short, long, default_value = "64")]
    max_clients: usize,
    /// Built-in level every match is played on
    #[arg(short, long, default_value = levels::DEFAULT_LEVEL)]
    level: String,
    /// Milliseconds between heartbeat pings
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,
    /// Seconds a match waits for players to load
    #[arg(long, default_value = "30")]
    ready_timeout: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            tick_rate: self.tick_rate,
            max_clients: self.max_clients,
            level: self.level,
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            ready_timeout: Duration::from_secs(self.ready_timeout),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!(
        "Starting server on {}:{} at {}Hz, level {}",
        args.host, args.port, args.tick_rate, args.level
    );

    let mut server = Server::new(args.into_config()).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
