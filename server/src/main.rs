use clap::Parser;
use log::{error, info};
use server::config::{parse_bind_addr, ServerConfig};
use server::network::Server;
use shared::DEFAULT_PORT;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum number of joined clients
    #[arg(short, long, default_value = "8")]
    max_clients: usize,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    client_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let bind_addr = parse_bind_addr(&args.host, args.port)?;
    let config = ServerConfig {
        bind_addr,
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.client_timeout),
        ..ServerConfig::default()
    };

    info!("Starting relay on {}", bind_addr);
    let mut server = Server::new(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            shutdown.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("Relay error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
