use clap::Parser;
use client::clock::SystemClock;
use client::config::ClientConfig;
use client::identity::{IdentityProvider, StaticIdentity};
use client::input::InputManager;
use client::matchmaking::{lobby_event_channel, LoopbackMatchmaking, MatchmakingBridge};
use client::network::Client;
use client::rendering::Renderer;
use client::transport::{ConnectTarget, UdpTransport};
use log::{error, info};
use macroquad::prelude::*;
use shared::ServerId;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:27015")]
    server: String,

    /// Reach the server by identity instead of address (see the server's --server-id)
    #[arg(long)]
    server_id: Option<u64>,

    /// Player name shown to other players
    #[arg(short = 'n', long, default_value = "Player")]
    name: String,

    /// Handshake retry interval in milliseconds
    #[arg(long, default_value = "500")]
    retry_ms: u64,

    /// Give up connecting after this many milliseconds
    #[arg(long, default_value = "5000")]
    handshake_timeout_ms: u64,

    /// Drop the connection after this many milliseconds of server silence
    #[arg(long, default_value = "5000")]
    liveness_timeout_ms: u64,

    /// Window width
    #[arg(short = 'w', long, default_value = "800")]
    width: usize,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "600")]
    height: usize,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            retry_interval: Duration::from_millis(self.retry_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            liveness_timeout: Duration::from_millis(self.liveness_timeout_ms),
            ..ClientConfig::default()
        }
    }
}

fn window_conf() -> Conf {
    let args = Args::parse();
    Conf {
        window_title: "SpaceWar".to_owned(),
        window_width: args.width as i32,
        window_height: args.height as i32,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let server: SocketAddr = match args.server.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid server address '{}': {}", args.server, e);
            return;
        }
    };
    let mut transport = UdpTransport::new();
    let target = match args.server_id.map(ServerId) {
        Some(id) => {
            transport = transport.with_route(id, server);
            ConnectTarget::Server(id)
        }
        None => ConnectTarget::Address(server),
    };

    let identity = StaticIdentity::from_name(&args.name);
    let local_player = identity.local_identity();
    info!("Starting client as {} ({})", args.name, local_player);
    info!("Game server: {}", target);

    let (events, receiver) = lobby_event_channel();
    let matchmaking = LoopbackMatchmaking::new(events, local_player).with_game_server(target);

    let mut client = Client::new(
        args.client_config(),
        Box::new(transport),
        Box::new(identity),
        MatchmakingBridge::new(Box::new(matchmaking), receiver),
        Box::new(SystemClock),
    );
    let mut input = InputManager::new(target, local_player);
    let mut renderer = Renderer::new(args.width, args.height);

    loop {
        let frame = input.update(client.current_game_state());
        if let Some(selection) = frame.selection {
            client.on_menu_selection(selection);
        }
        if let Some(controls) = frame.controls {
            client.send_server_data(&controls, false);
        }

        client.run_frame();
        if client.should_quit() {
            break;
        }

        renderer.render(&client);
        next_frame().await;
    }

    info!("Client shut down");
}
