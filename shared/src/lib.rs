use serde::{Deserialize, Serialize};
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PLAYERS_PER_SERVER: usize = 4;
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Stable identity of a player, as resolved by the platform identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

/// Identity a game server announces during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub u64);

/// Opaque lobby identifier assigned by the matchmaking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LobbyId(pub u64);

/// Token chosen by the client for one connection attempt and echoed by the server.
pub type SessionToken = u32;

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player:{:016x}", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server:{:016x}", self.0)
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lobby:{:016x}", self.0)
    }
}

/// Round phase as seen by the authoritative server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerPhase {
    WaitingForPlayers,
    Active,
    Draw,
    Winner,
    Exiting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub identity: PlayerId,
    pub score: u32,
    /// Gameplay-specific ship state, never interpreted by the session layer.
    pub ship: Vec<u8>,
}

/// Complete world snapshot. Every update replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerUpdate {
    pub phase: ServerPhase,
    pub winner: Option<u32>,
    pub players: Vec<Option<PlayerUpdate>>,
}

impl ServerUpdate {
    pub fn empty(phase: ServerPhase) -> Self {
        Self {
            phase,
            winner: None,
            players: vec![None; MAX_PLAYERS_PER_SERVER],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Hello {
        client_version: u32,
    },
    BeginAuthentication {
        identity: PlayerId,
        name: String,
    },
    ClientUpdate {
        payload: Vec<u8>,
    },
    ClientLeaving,

    ServerInfo {
        server_id: ServerId,
        secure: bool,
        server_name: String,
    },
    AuthResponse {
        success: bool,
        player_slot: u32,
        reason: String,
    },
    ServerUpdate(ServerUpdate),
    ServerExiting,

    LobbyMemberStatus {
        lobby: LobbyId,
        member: PlayerId,
        ready: bool,
    },
}

/// The fixed set of message kinds a datagram can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Hello,
    BeginAuthentication,
    ClientUpdate,
    ClientLeaving,
    ServerInfo,
    AuthResponse,
    ServerUpdate,
    ServerExiting,
    LobbyMemberStatus,
}

impl MessageKind {
    /// Kinds that belong to the hello → server-info → auth-response exchange.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            MessageKind::Hello
                | MessageKind::BeginAuthentication
                | MessageKind::ServerInfo
                | MessageKind::AuthResponse
        )
    }

    pub fn is_lobby(self) -> bool {
        matches!(self, MessageKind::LobbyMemberStatus)
    }
}

impl Packet {
    pub fn kind(&self) -> MessageKind {
        match self {
            Packet::Hello { .. } => MessageKind::Hello,
            Packet::BeginAuthentication { .. } => MessageKind::BeginAuthentication,
            Packet::ClientUpdate { .. } => MessageKind::ClientUpdate,
            Packet::ClientLeaving => MessageKind::ClientLeaving,
            Packet::ServerInfo { .. } => MessageKind::ServerInfo,
            Packet::AuthResponse { .. } => MessageKind::AuthResponse,
            Packet::ServerUpdate(_) => MessageKind::ServerUpdate,
            Packet::ServerExiting => MessageKind::ServerExiting,
            Packet::LobbyMemberStatus { .. } => MessageKind::LobbyMemberStatus,
        }
    }
}

/// What actually goes on the wire: a packet tagged with the connection attempt it belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    pub session: SessionToken,
    pub packet: Packet,
}

impl Envelope {
    pub fn new(session: SessionToken, packet: Packet) -> Self {
        Self { session, packet }
    }
}

pub fn encode(envelope: &Envelope) -> bincode::Result<Vec<u8>> {
    bincode::serialize(envelope)
}

pub fn decode(bytes: &[u8]) -> bincode::Result<Envelope> {
    bincode::deserialize(bytes)
}
