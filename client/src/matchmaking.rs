//! Lobby coordination through an external matchmaking service
//!
//! Requests to the service are fire-and-forget. Results come back later as
//! `LobbyEvent`s, pushed by the service from whatever context it runs in onto
//! an unbounded channel. The client drains that channel once per frame, before
//! dispatching network data, so lobby events never race with frame logic.
//!
//! `MatchmakingBridge` owns a lobby while it is being created or joined and
//! turns each event into a `LobbyTransition` for the client to apply.

use crate::error::ConnectionFailure;
use crate::game::GameState;
use crate::transport::ConnectTarget;
use log::{debug, info, warn};
use shared::{LobbyId, PlayerId};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TryRecvError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyMember {
    pub identity: PlayerId,
    pub ready: bool,
    pub leave_requested: bool,
    pub start_requested: bool,
}

impl LobbyMember {
    pub fn new(identity: PlayerId) -> Self {
        Self {
            identity,
            ready: false,
            leave_requested: false,
            start_requested: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lobby {
    pub id: LobbyId,
    pub members: Vec<LobbyMember>,
}

impl Lobby {
    pub fn member(&self, identity: PlayerId) -> Option<&LobbyMember> {
        self.members.iter().find(|m| m.identity == identity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    Created {
        lobby: LobbyId,
        success: bool,
    },
    Entered {
        lobby: LobbyId,
        success: bool,
        members: Vec<LobbyMember>,
    },
    /// The lobby's host started a game server
    GameCreated {
        lobby: LobbyId,
        server: ConnectTarget,
    },
    RosterChanged {
        lobby: LobbyId,
        members: Vec<LobbyMember>,
    },
    Left {
        lobby: LobbyId,
    },
}

pub type LobbyEventSender = mpsc::UnboundedSender<LobbyEvent>;
pub type LobbyEventReceiver = mpsc::UnboundedReceiver<LobbyEvent>;

pub fn lobby_event_channel() -> (LobbyEventSender, LobbyEventReceiver) {
    mpsc::unbounded_channel()
}

pub trait MatchmakingService {
    fn create_lobby(&mut self);
    fn join_lobby(&mut self, lobby: LobbyId);
    fn set_ready(&mut self, lobby: LobbyId, ready: bool);
    fn request_start_game(&mut self, lobby: LobbyId);
    fn leave_lobby(&mut self, lobby: LobbyId);
}

/// What the client should do in response to a lobby event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyTransition {
    /// Our lobby exists; show the lobby view while membership arrives
    ShowLobby(LobbyId),
    Entered(Lobby),
    RosterChanged(Vec<LobbyMember>),
    ConnectToServer(ConnectTarget),
    Left,
    Failed {
        failure: ConnectionFailure,
        fallback: GameState,
    },
    Ignored,
}

pub struct MatchmakingBridge {
    service: Box<dyn MatchmakingService>,
    events: LobbyEventReceiver,
    creating: bool,
    /// Lobby being created or joined but not entered yet
    forming: Option<LobbyId>,
}

impl MatchmakingBridge {
    pub fn new(service: Box<dyn MatchmakingService>, events: LobbyEventReceiver) -> Self {
        Self {
            service,
            events,
            creating: false,
            forming: None,
        }
    }

    /// Everything the service delivered since the last frame
    pub fn drain_events(&mut self) -> Vec<LobbyEvent> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => drained.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Matchmaking service dropped its event sender");
                    break;
                }
            }
        }
        drained
    }

    pub fn is_creating(&self) -> bool {
        self.creating
    }

    pub fn forming(&self) -> Option<LobbyId> {
        self.forming
    }

    pub fn create_lobby(&mut self) {
        if self.creating {
            return;
        }
        info!("Requesting a new lobby");
        self.creating = true;
        self.forming = None;
        self.service.create_lobby();
    }

    pub fn join_lobby(&mut self, lobby: LobbyId) {
        info!("Requesting to join {}", lobby);
        self.creating = false;
        self.forming = Some(lobby);
        self.service.join_lobby(lobby);
    }

    pub fn set_ready(&mut self, lobby: LobbyId, ready: bool) {
        self.service.set_ready(lobby, ready);
    }

    pub fn request_start_game(&mut self, lobby: LobbyId) {
        self.service.request_start_game(lobby);
    }

    pub fn leave_lobby(&mut self, lobby: LobbyId) {
        if self.forming == Some(lobby) {
            self.forming = None;
        }
        self.service.leave_lobby(lobby);
    }

    /// Forgets any create/join still in flight; their results will be ignored
    pub fn cancel_pending(&mut self) {
        self.creating = false;
        self.forming = None;
    }

    pub fn handle(
        &mut self,
        event: LobbyEvent,
        state: GameState,
        held: Option<LobbyId>,
    ) -> LobbyTransition {
        match event {
            LobbyEvent::Created { lobby, success } => self.on_lobby_created(lobby, success, state),
            LobbyEvent::Entered {
                lobby,
                success,
                members,
            } => self.on_lobby_entered(lobby, success, members, state, held),
            LobbyEvent::GameCreated { lobby, server } => {
                self.on_lobby_game_created(lobby, server, state, held)
            }
            LobbyEvent::RosterChanged { lobby, members } => {
                if held == Some(lobby) {
                    LobbyTransition::RosterChanged(members)
                } else {
                    LobbyTransition::Ignored
                }
            }
            LobbyEvent::Left { lobby } => {
                if self.forming == Some(lobby) {
                    self.forming = None;
                }
                if held == Some(lobby) {
                    info!("Left {}", lobby);
                    LobbyTransition::Left
                } else {
                    LobbyTransition::Ignored
                }
            }
        }
    }

    fn on_lobby_created(&mut self, lobby: LobbyId, success: bool, state: GameState) -> LobbyTransition {
        if !self.creating || state != GameState::CreatingLobby {
            debug!("Ignoring stale lobby creation result for {}", lobby);
            if success {
                self.service.leave_lobby(lobby);
            }
            return LobbyTransition::Ignored;
        }
        self.creating = false;

        if !success {
            warn!("Lobby creation failed");
            return LobbyTransition::Failed {
                failure: ConnectionFailure::Matchmaking(
                    "Failed to create lobby (lost connection to matchmaking service)".into(),
                ),
                fallback: GameState::Menu,
            };
        }

        info!("Created {}", lobby);
        self.forming = Some(lobby);
        LobbyTransition::ShowLobby(lobby)
    }

    fn on_lobby_entered(
        &mut self,
        lobby: LobbyId,
        success: bool,
        members: Vec<LobbyMember>,
        state: GameState,
        held: Option<LobbyId>,
    ) -> LobbyTransition {
        let expected = matches!(
            state,
            GameState::CreatingLobby | GameState::JoiningLobby | GameState::InLobby
        );
        if self.forming != Some(lobby) || !expected {
            debug!("Ignoring stale lobby entry for {}", lobby);
            if success && held != Some(lobby) {
                self.service.leave_lobby(lobby);
            }
            return LobbyTransition::Ignored;
        }
        self.forming = None;

        if !success {
            warn!("Failed to enter {}", lobby);
            return LobbyTransition::Failed {
                failure: ConnectionFailure::Matchmaking("Failed to enter lobby".into()),
                fallback: GameState::FindLobby,
            };
        }

        info!("Entered {} with {} members", lobby, members.len());
        LobbyTransition::Entered(Lobby { id: lobby, members })
    }

    fn on_lobby_game_created(
        &mut self,
        lobby: LobbyId,
        server: ConnectTarget,
        state: GameState,
        held: Option<LobbyId>,
    ) -> LobbyTransition {
        if held != Some(lobby) || state != GameState::InLobby {
            debug!("Ignoring game start for {} (state {:?})", lobby, state);
            return LobbyTransition::Ignored;
        }

        info!("{} started a game on {}", lobby, server);
        self.service.leave_lobby(lobby);
        LobbyTransition::ConnectToServer(server)
    }
}

/// In-process matchmaking service. Every request is answered immediately by
/// queueing the events a real service would eventually deliver.
pub struct LoopbackMatchmaking {
    events: LobbyEventSender,
    local: PlayerId,
    lobbies: HashMap<LobbyId, Vec<LobbyMember>>,
    next_lobby: u64,
    game_server: Option<ConnectTarget>,
}

impl LoopbackMatchmaking {
    pub fn new(events: LobbyEventSender, local: PlayerId) -> Self {
        Self {
            events,
            local,
            lobbies: HashMap::new(),
            next_lobby: 1,
            game_server: None,
        }
    }

    /// Server announced to a lobby when one of its members asks to start
    pub fn with_game_server(mut self, server: ConnectTarget) -> Self {
        self.game_server = Some(server);
        self
    }

    /// Registers a lobby hosted by someone else so it can be joined
    pub fn host_lobby(&mut self, members: Vec<LobbyMember>) -> LobbyId {
        let id = self.allocate_id();
        self.lobbies.insert(id, members);
        id
    }

    fn allocate_id(&mut self) -> LobbyId {
        let id = LobbyId(self.next_lobby);
        self.next_lobby += 1;
        id
    }

    fn emit(&self, event: LobbyEvent) {
        if self.events.send(event).is_err() {
            debug!("Lobby event dropped, bridge is gone");
        }
    }

    fn emit_roster(&self, lobby: LobbyId) {
        if let Some(members) = self.lobbies.get(&lobby) {
            self.emit(LobbyEvent::RosterChanged {
                lobby,
                members: members.clone(),
            });
        }
    }

    fn update_local<F: FnOnce(&mut LobbyMember)>(&mut self, lobby: LobbyId, update: F) -> bool {
        let local = self.local;
        match self
            .lobbies
            .get_mut(&lobby)
            .and_then(|members| members.iter_mut().find(|m| m.identity == local))
        {
            Some(member) => {
                update(member);
                true
            }
            None => false,
        }
    }
}

impl MatchmakingService for LoopbackMatchmaking {
    fn create_lobby(&mut self) {
        let lobby = self.allocate_id();
        let members = vec![LobbyMember::new(self.local)];
        self.lobbies.insert(lobby, members.clone());

        self.emit(LobbyEvent::Created {
            lobby,
            success: true,
        });
        self.emit(LobbyEvent::Entered {
            lobby,
            success: true,
            members,
        });
    }

    fn join_lobby(&mut self, lobby: LobbyId) {
        let local = self.local;
        let members = match self.lobbies.get_mut(&lobby) {
            Some(members) => {
                if !members.iter().any(|m| m.identity == local) {
                    members.push(LobbyMember::new(local));
                }
                members.clone()
            }
            None => {
                self.emit(LobbyEvent::Entered {
                    lobby,
                    success: false,
                    members: Vec::new(),
                });
                return;
            }
        };

        self.emit(LobbyEvent::Entered {
            lobby,
            success: true,
            members,
        });
    }

    fn set_ready(&mut self, lobby: LobbyId, ready: bool) {
        if self.update_local(lobby, |m| m.ready = ready) {
            self.emit_roster(lobby);
        }
    }

    fn request_start_game(&mut self, lobby: LobbyId) {
        if !self.update_local(lobby, |m| m.start_requested = true) {
            return;
        }
        self.emit_roster(lobby);

        if let Some(server) = self.game_server {
            self.emit(LobbyEvent::GameCreated { lobby, server });
        }
    }

    fn leave_lobby(&mut self, lobby: LobbyId) {
        if !self.update_local(lobby, |m| m.leave_requested = true) {
            return;
        }
        // Remaining members see the request before the member disappears
        self.emit_roster(lobby);

        let local = self.local;
        let Some(members) = self.lobbies.get_mut(&lobby) else {
            return;
        };

        members.retain(|m| m.identity != local);
        if members.is_empty() {
            self.lobbies.remove(&lobby);
        }
        self.emit(LobbyEvent::Left { lobby });
    }
}
