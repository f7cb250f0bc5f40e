use clap::Parser;
use client::input::HELP;
use client::network::{Client, ClientConfig};
use log::info;
use std::time::Duration;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9090")]
    server: String,

    /// Milliseconds between reconnection attempts
    #[arg(short = 'r', long, default_value = "2000")]
    retry_ms: u64,

    /// Milliseconds between heartbeat pings
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Unanswered pings before the connection is considered dead
    #[arg(long, default_value = "3")]
    heartbeat_threshold: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    println!("{}", HELP);

    let mut client = Client::new(ClientConfig {
        server: args.server,
        retry_interval: Duration::from_millis(args.retry_ms),
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        heartbeat_threshold: args.heartbeat_threshold,
        ..ClientConfig::default()
    });

    let cancel = client.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, logging out...");
            cancel.cancel();
        }
    });

    client.run(BufReader::new(tokio::io::stdin())).await?;

    Ok(())
}
