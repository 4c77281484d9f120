use clap::Parser;
use log::info;
use server::config::{self, ServerConfig};
use server::events::EventHook;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to bind to
    #[arg(short = 'H', long, default_value = config::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Seconds to wait for a new client's username (0 waits forever)
    #[arg(long, default_value_t = config::DEFAULT_HANDSHAKE_TIMEOUT.as_secs())]
    handshake_timeout: u64,

    /// Role sent to the first two clients to join
    #[arg(long, default_value = config::DEFAULT_DISTINGUISHED_ROLE)]
    first_role: String,

    /// Role sent to every later client
    #[arg(long, default_value = config::DEFAULT_ROLE)]
    default_role: String,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            handshake_timeout: (args.handshake_timeout > 0)
                .then(|| Duration::from_secs(args.handshake_timeout)),
            distinguished_role: args.first_role,
            default_role: args.default_role,
        }
    }
}

/// Prefixes a status line with the local wall-clock time.
fn timestamped(line: &str) -> String {
    format!("{} {}", chrono::Local::now().format("%H:%M:%S"), line)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ServerConfig::from(args);

    info!("Starting relay server on {}", config.address());
    let events = EventHook::new(|line| println!("{}", timestamped(line)));
    let server = Server::start(config, events).await?;

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down gracefully...");
    server.stop().await;

    Ok(())
}
