//! Server network layer handling UDP communications and the tick loop

use crate::client_manager::{Admission, ClientManager};
use crate::error::ServerError;
use log::{debug, error, info, warn};
use shared::{
    decode, encode, Envelope, Packet, ServerId, ServerPhase, MAX_DATAGRAM_SIZE,
    MAX_PLAYERS_PER_SERVER, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub name: String,
    /// Advertised in the server info; this server does not enforce anything with it
    pub secure: bool,
    pub tick_duration: Duration,
    pub client_timeout: Duration,
    pub max_clients: usize,
    /// Players needed before a round goes active
    pub min_players: usize,
    /// Fixed identity for clients that route by server id; random when unset
    pub server_id: Option<ServerId>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:27015".to_string(),
            name: "SpaceWar Server".to_string(),
            secure: false,
            tick_duration: Duration::from_millis(50),
            client_timeout: Duration::from_secs(5),
            max_clients: MAX_PLAYERS_PER_SERVER,
            min_players: 2,
            server_id: None,
        }
    }
}

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { envelope: Envelope, addr: SocketAddr },
    ClientTimeout { slot: usize },
    Shutdown,
}

/// Messages sent from the main loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { envelope: Envelope, addr: SocketAddr },
    /// Sent to every authenticated client under its own session token
    BroadcastPacket { packet: Packet },
}

pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    config: ServerConfig,
    server_id: ServerId,
    phase: ServerPhase,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind(&config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let server_id = config.server_id.unwrap_or_else(|| ServerId(rand::random()));
        info!(
            "Server '{}' ({}) listening on {}",
            config.name,
            server_id,
            socket.local_addr()?
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket: Arc::new(socket),
            clients: Arc::new(RwLock::new(ClientManager::new(config.max_clients))),
            config,
            server_id,
            phase: ServerPhase::WaitingForPlayers,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Sending `ServerMessage::Shutdown` here stops `run` after notifying clients
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match decode(&buffer[..len]) {
                        Ok(envelope) => {
                            if server_tx
                                .send(ServerMessage::PacketReceived { envelope, addr })
                                .is_err()
                            {
                                debug!("Main loop gone, stopping receiver");
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode datagram from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing queue
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let clients = Arc::clone(&self.clients);

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { envelope, addr } => {
                        if let Err(e) = Self::send_envelope_impl(&socket, &envelope, addr).await {
                            error!("{}", e);
                        }
                    }
                    GameMessage::BroadcastPacket { packet } => {
                        let recipients = clients.read().await.recipients();
                        for (addr, session) in recipients {
                            let envelope = Envelope::new(session, packet.clone());
                            if let Err(e) = Self::send_envelope_impl(&socket, &envelope, addr).await
                            {
                                error!("{}", e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that drops silent clients
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.client_timeout;
        let period = (timeout / 4).clamp(Duration::from_millis(50), Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let timed_out = clients.write().await.check_timeouts(Instant::now(), timeout);

                for slot in timed_out {
                    if server_tx.send(ServerMessage::ClientTimeout { slot }).is_err() {
                        return;
                    }
                }
            }
        });
    }

    async fn send_envelope_impl(
        socket: &UdpSocket,
        envelope: &Envelope,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = encode(envelope)?;
        socket
            .send_to(&data, addr)
            .await
            .map_err(|source| ServerError::Send { addr, source })?;
        Ok(())
    }

    fn send_packet(&self, envelope: Envelope, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { envelope, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self.game_tx.send(GameMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Answers handshake messages and records client activity
    async fn handle_packet(&mut self, envelope: Envelope, addr: SocketAddr) {
        let Envelope { session, packet } = envelope;
        let now = Instant::now();

        match packet {
            Packet::Hello { client_version } => {
                if client_version != PROTOCOL_VERSION {
                    warn!("{} uses protocol {}, rejecting", addr, client_version);
                    let response = Packet::AuthResponse {
                        success: false,
                        player_slot: 0,
                        reason: format!("Unsupported client version {}", client_version),
                    };
                    self.send_packet(Envelope::new(session, response), addr);
                    return;
                }

                debug!("Hello from {} (session {})", addr, session);
                self.clients
                    .write()
                    .await
                    .register_hello(addr, session, now);

                let response = Packet::ServerInfo {
                    server_id: self.server_id,
                    secure: self.config.secure,
                    server_name: self.config.name.clone(),
                };
                self.send_packet(Envelope::new(session, response), addr);
            }

            Packet::BeginAuthentication { identity, name } => {
                let admission = self
                    .clients
                    .write()
                    .await
                    .authenticate(addr, session, identity, name, now);

                let response = match admission {
                    Admission::Admitted { slot } => Packet::AuthResponse {
                        success: true,
                        player_slot: slot as u32,
                        reason: String::new(),
                    },
                    Admission::Rejected { reason } => {
                        info!("Rejected {}: {}", addr, reason);
                        Packet::AuthResponse {
                            success: false,
                            player_slot: 0,
                            reason,
                        }
                    }
                };
                self.send_packet(Envelope::new(session, response), addr);
            }

            Packet::ClientUpdate { payload } => {
                let known = self
                    .clients
                    .write()
                    .await
                    .record_update(addr, session, payload, now);
                if !known {
                    debug!("Update from unknown session {} at {}", session, addr);
                }
            }

            Packet::ClientLeaving => {
                self.clients.write().await.remove(addr, session);
            }

            other => {
                warn!("Unexpected {:?} from client at {}", other.kind(), addr);
            }
        }
    }

    /// Advances the round phase and broadcasts the snapshot
    async fn tick(&mut self) {
        let clients = self.clients.read().await;
        let count = clients.len();

        let phase = if count >= self.config.min_players {
            ServerPhase::Active
        } else {
            ServerPhase::WaitingForPlayers
        };
        if phase != self.phase {
            info!("Round phase {:?} -> {:?} ({} players)", self.phase, phase, count);
            self.phase = phase;
        }

        if count == 0 {
            return;
        }

        let update = clients.snapshot(self.phase);
        drop(clients);
        self.broadcast_packet(Packet::ServerUpdate(update));
    }

    /// Tells every client the server is going away. Sent directly so it is
    /// not lost behind the sender task's queue.
    async fn notify_exiting(&self) {
        let recipients = self.clients.read().await.recipients();
        for (addr, session) in recipients {
            let envelope = Envelope::new(session, Packet::ServerExiting);
            if let Err(e) = Self::send_envelope_impl(&self.socket, &envelope, addr).await {
                warn!("{}", e);
            }
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.config.tick_duration);

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { envelope, addr }) => {
                            self.handle_packet(envelope, addr).await;
                        },
                        Some(ServerMessage::ClientTimeout { slot }) => {
                            debug!("Slot {} freed by timeout", slot);
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    self.tick().await;
                },
            }
        }

        self.notify_exiting().await;
        Ok(())
    }
}
