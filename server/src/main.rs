use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig, ServerMessage};
use shared::{ServerId, MAX_PLAYERS_PER_SERVER};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "27015")]
    port: u16,

    /// Name announced to connecting clients
    #[arg(short, long, default_value = "SpaceWar Server")]
    name: String,

    /// Tick rate (snapshots per second)
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Seconds of silence before a client is dropped
    #[arg(long, default_value = "5")]
    client_timeout: u64,

    /// Players needed to start a round
    #[arg(long, default_value = "2")]
    min_players: usize,

    /// Pin the server identity (random when omitted)
    #[arg(long)]
    server_id: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        name: args.name,
        tick_duration: Duration::from_secs_f32(1.0 / args.tick_rate.max(1) as f32),
        client_timeout: Duration::from_secs(args.client_timeout),
        min_players: args.min_players.clamp(1, MAX_PLAYERS_PER_SERVER),
        server_id: args.server_id.map(ServerId),
        ..ServerConfig::default()
    };

    let mut server = Server::new(config).await?;

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                let _ = shutdown.send(ServerMessage::Shutdown);
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.run().await?;
    Ok(())
}
