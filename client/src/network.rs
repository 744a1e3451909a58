//! Top-level client: game-state machine, roster and per-frame driver
//!
//! `Client::run_frame` is the only driver and is called once per rendered frame:
//! 1. drain lobby events queued by the matchmaking service since last frame
//! 2. poll the transport and dispatch every datagram by message kind
//! 3. run one-time entry logic if the state changed since the last frame
//! 4. run steady-state logic (handshake retries, timeouts, keep-alives)
//!
//! Before authentication only handshake messages are accepted. Afterwards
//! world snapshots and the server's exit notice are accepted and handshake
//! messages are ignored, so a replayed auth response can never re-seat us.

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::error::{bounded_error_text, ConnectionFailure};
use crate::game::{GameState, PlayerRoster, RosterEntry, RoundStats};
use crate::handshake::{HandshakeEvent, SessionAuthenticator};
use crate::identity::IdentityProvider;
use crate::matchmaking::{Lobby, LobbyTransition, MatchmakingBridge};
use crate::menu::{LobbyAction, LobbyMemberSelection, MenuSelection};
use crate::session::{ConnectionSession, ConnectionState, ServerInfo};
use crate::transport::{ConnectTarget, Delivery, Transport};
use log::{debug, info, warn};
use shared::{Packet, PlayerId, ServerPhase, ServerUpdate};
use std::time::Instant;

pub struct Client {
    config: ClientConfig,
    clock: Box<dyn Clock>,
    identity: Box<dyn IdentityProvider>,
    local_player: PlayerId,

    session: ConnectionSession,
    authenticator: SessionAuthenticator,
    matchmaking: MatchmakingBridge,
    lobby: Option<Lobby>,

    roster: PlayerRoster,
    local_slot: Option<usize>,
    last_winner: Option<usize>,
    stats: RoundStats,

    game_state: GameState,
    previous_state: GameState,
    transitioned: bool,
    state_transition_time: Instant,
    error_text: String,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport: Box<dyn Transport>,
        identity: Box<dyn IdentityProvider>,
        matchmaking: MatchmakingBridge,
        clock: Box<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let local_player = identity.local_identity();
        let name = identity.display_name(local_player);
        let authenticator = SessionAuthenticator::new(config.clone(), local_player, name);

        Self {
            config,
            clock,
            identity,
            local_player,
            session: ConnectionSession::new(transport, now),
            authenticator,
            matchmaking,
            lobby: None,
            roster: PlayerRoster::new(),
            local_slot: None,
            last_winner: None,
            stats: RoundStats::default(),
            game_state: GameState::Menu,
            previous_state: GameState::Menu,
            transitioned: true,
            state_transition_time: now,
            error_text: String::new(),
        }
    }

    pub fn run_frame(&mut self) {
        self.process_lobby_events();
        self.receive_network_data();

        // Transitions made later in this frame raise the flag for the next one
        if std::mem::take(&mut self.transitioned) {
            self.run_state_entry();
        }

        let now = self.clock.now();
        self.run_state_frame(now);
    }

    /// Reads every pending datagram and dispatches it by kind
    pub fn receive_network_data(&mut self) {
        let now = self.clock.now();
        for packet in self.session.receive(now) {
            if !self.session.is_live() {
                debug!("Session ended mid-batch, dropping {:?}", packet.kind());
                continue;
            }
            self.dispatch_packet(packet, now);
        }
    }

    fn dispatch_packet(&mut self, packet: Packet, now: Instant) {
        let kind = packet.kind();
        match self.session.state() {
            ConnectionState::PendingAuthentication => match packet {
                Packet::ServerInfo {
                    server_id,
                    secure,
                    server_name,
                } => {
                    let info = ServerInfo {
                        server_id,
                        secure,
                        name: server_name,
                    };
                    self.authenticator.on_server_info(&mut self.session, info, now);
                }
                Packet::AuthResponse {
                    success,
                    player_slot,
                    reason,
                } => {
                    let event = self.authenticator.on_auth_response(
                        &mut self.session,
                        success,
                        player_slot,
                        &reason,
                        now,
                    );
                    match event {
                        HandshakeEvent::Authenticated { slot } => self.on_authenticated(slot),
                        HandshakeEvent::Failed(failure) => self.fail_connection(failure),
                        HandshakeEvent::ServerInfoReceived | HandshakeEvent::Ignored => {}
                    }
                }
                _ => debug!("Discarding {:?} received before authentication", kind),
            },
            ConnectionState::AuthenticatedAndActive => match packet {
                Packet::ServerUpdate(update) => self.on_receive_server_update(update),
                Packet::ServerExiting => self.on_receive_server_exiting(),
                _ if kind.is_handshake() => debug!("Ignoring replayed {:?}", kind),
                _ if kind.is_lobby() => debug!("Lobby traffic belongs to matchmaking, dropping {:?}", kind),
                _ => warn!("Unexpected {:?} from server", kind),
            },
            ConnectionState::NotConnected | ConnectionState::Disconnected => {
                debug!("Discarding {:?}, no live session", kind)
            }
        }
    }

    fn on_authenticated(&mut self, slot: usize) {
        self.error_text.clear();
        self.local_slot = Some(slot);
        self.roster.occupy(slot, self.local_player);

        if !self.game_state.overrides_server() {
            self.set_game_state(GameState::WaitingForPlayers);
        }
    }

    fn on_receive_server_update(&mut self, update: ServerUpdate) {
        if update.phase == ServerPhase::Exiting {
            self.on_receive_server_exiting();
            return;
        }

        match update.phase {
            ServerPhase::Winner => self.last_winner = update.winner.map(|w| w as usize),
            ServerPhase::Draw => self.last_winner = None,
            _ => {}
        }

        self.roster.apply_update(&update);

        if !self.game_state.overrides_server() {
            self.set_game_state(GameState::from_server_phase(update.phase));
        }
    }

    fn on_receive_server_exiting(&mut self) {
        info!("Game server is exiting");
        self.session.mark_disconnected();
        self.roster.clear();
        self.fail_connection(ConnectionFailure::ServerExiting);
    }

    fn fail_connection(&mut self, failure: ConnectionFailure) {
        warn!("Connection failed: {}", failure);
        self.set_connection_failure_text(&failure.to_string());
        self.set_game_state(GameState::ConnectionFailure);
        // The state hook only disconnects on an actual state change
        self.disconnect_from_server();
    }

    /// Starts a fresh connection attempt, replacing any current one
    pub fn initiate_server_connection(&mut self, target: ConnectTarget) {
        // A game server connection supersedes any lobby
        self.leave_lobby();
        self.set_game_state(GameState::Connecting);
        self.error_text.clear();
        self.roster.clear();
        self.local_slot = None;

        let hello = self.authenticator.hello();
        let now = self.clock.now();
        if let Err(e) = self.session.begin(target, hello, now) {
            self.fail_connection(ConnectionFailure::TransportEstablishment(e.to_string()));
        }
    }

    /// Sends gameplay data to the server. Fails unless fully authenticated.
    pub fn send_server_data(&mut self, payload: &[u8], reliable: bool) -> bool {
        if self.session.state() != ConnectionState::AuthenticatedAndActive {
            return false;
        }

        let packet = Packet::ClientUpdate {
            payload: payload.to_vec(),
        };
        let now = self.clock.now();
        match self.session.send(packet, Delivery::from_reliable(reliable), now) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send data to server: {}", e);
                false
            }
        }
    }

    /// Tells the server we are leaving, if connected at all. Safe in any state.
    pub fn disconnect_from_server(&mut self) {
        self.session.disconnect();
    }

    pub fn on_menu_selection(&mut self, selection: MenuSelection) {
        match selection {
            MenuSelection::State(state) => self.set_game_state(state),
            MenuSelection::ServerBrowser(entry) => {
                if entry.target_state == GameState::Connecting {
                    self.initiate_server_connection(entry.server);
                } else {
                    self.set_game_state(entry.target_state);
                }
            }
            MenuSelection::LobbyBrowser(entry) => {
                if entry.target_state == GameState::JoiningLobby {
                    // Result arrives later as a lobby event
                    self.matchmaking.join_lobby(entry.lobby);
                }
                self.set_game_state(entry.target_state);
            }
            MenuSelection::LobbyMember(selection) => self.on_lobby_member_selection(selection),
        }
    }

    fn on_lobby_member_selection(&mut self, selection: LobbyMemberSelection) {
        let Some(lobby) = self.lobby.as_ref() else {
            debug!("Lobby action {:?} without a lobby", selection.action);
            return;
        };
        let lobby_id = lobby.id;

        match selection.action {
            LobbyAction::ToggleReady => {
                if selection.member != self.local_player {
                    return;
                }
                let ready = lobby
                    .member(self.local_player)
                    .map_or(false, |member| member.ready);
                self.matchmaking.set_ready(lobby_id, !ready);
            }
            LobbyAction::StartGame => self.matchmaking.request_start_game(lobby_id),
            LobbyAction::Leave => self.matchmaking.leave_lobby(lobby_id),
        }
    }

    fn process_lobby_events(&mut self) {
        for event in self.matchmaking.drain_events() {
            let held = self.lobby.as_ref().map(|lobby| lobby.id);
            let transition = self.matchmaking.handle(event, self.game_state, held);
            self.apply_lobby_transition(transition);
        }
    }

    fn apply_lobby_transition(&mut self, transition: LobbyTransition) {
        match transition {
            LobbyTransition::ShowLobby(_) => self.set_game_state(GameState::InLobby),
            LobbyTransition::Entered(lobby) => {
                self.lobby = Some(lobby);
                self.set_game_state(GameState::InLobby);
            }
            LobbyTransition::RosterChanged(members) => {
                if let Some(lobby) = self.lobby.as_mut() {
                    lobby.members = members;
                }
            }
            LobbyTransition::ConnectToServer(server) => {
                self.lobby = None;
                self.initiate_server_connection(server);
            }
            LobbyTransition::Left => {
                self.lobby = None;
                if self.game_state == GameState::InLobby {
                    self.set_game_state(GameState::Menu);
                }
            }
            LobbyTransition::Failed { failure, fallback } => {
                self.set_connection_failure_text(&failure.to_string());
                self.set_game_state(fallback);
            }
            LobbyTransition::Ignored => {}
        }
    }

    fn leave_lobby(&mut self) {
        if let Some(lobby) = self.lobby.take() {
            self.matchmaking.leave_lobby(lobby.id);
        }
        if let Some(forming) = self.matchmaking.forming() {
            self.matchmaking.leave_lobby(forming);
        }
        self.matchmaking.cancel_pending();
    }

    pub fn set_game_state(&mut self, state: GameState) {
        if self.game_state == state {
            return;
        }

        let previous = self.game_state;
        self.previous_state = previous;
        self.game_state = state;
        self.transitioned = true;
        self.state_transition_time = self.clock.now();
        self.on_game_state_changed(previous, state);
    }

    fn on_game_state_changed(&mut self, previous: GameState, state: GameState) {
        debug!("Game state {:?} -> {:?}", previous, state);

        if !state.is_in_game() && state != GameState::QuitMenu {
            self.roster.clear();
            self.local_slot = None;
            // Only Connecting keeps an attempt alive outside the game
            if state != GameState::Connecting {
                self.disconnect_from_server();
            }
        }

        match state {
            GameState::Menu | GameState::Exiting => self.leave_lobby(),
            GameState::CreatingLobby => self.matchmaking.create_lobby(),
            _ => {}
        }
    }

    /// One-time logic for the first frame spent in a state
    fn run_state_entry(&mut self) {
        match self.game_state {
            GameState::Connecting => {
                if let Some(target) = self.session.target() {
                    info!("Waiting for {} to answer", target);
                }
            }
            GameState::Active => {
                info!("Round started with {} players", self.roster.occupied());
            }
            // Back from the quit overlay, this result was already counted
            GameState::Winner | GameState::Draw if self.previous_state == GameState::QuitMenu => {}
            GameState::Winner | GameState::Draw => {
                self.stats.played += 1;
                if self.local_player_won_last_game() {
                    self.stats.won += 1;
                }
                info!(
                    "Round over ({:?}), won {} of {}",
                    self.game_state, self.stats.won, self.stats.played
                );
            }
            GameState::ConnectionFailure => info!("{}", self.error_text),
            GameState::Exiting => info!("Exiting"),
            _ => {}
        }
    }

    fn run_state_frame(&mut self, now: Instant) {
        if self.session.state() != ConnectionState::NotConnected {
            if let Some(failure) = self.authenticator.poll(&mut self.session, now) {
                self.fail_connection(failure);
            }
        }

        if self.game_state.is_in_game() && self.session.state() == ConnectionState::NotConnected {
            debug!("In {:?} without a server, returning to menu", self.game_state);
            self.set_game_state(GameState::Menu);
        }
    }

    pub fn set_connection_failure_text(&mut self, text: &str) {
        self.error_text = bounded_error_text(text);
    }

    pub fn local_player_won_last_game(&self) -> bool {
        self.last_winner.is_some() && self.last_winner == self.local_slot
    }

    pub fn current_game_state(&self) -> GameState {
        self.game_state
    }

    pub fn last_error_text(&self) -> &str {
        &self.error_text
    }

    pub fn player_roster(&self) -> Vec<RosterEntry> {
        self.roster.entries()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn lobby(&self) -> Option<&Lobby> {
        self.lobby.as_ref()
    }

    pub fn local_player(&self) -> PlayerId {
        self.local_player
    }

    pub fn local_slot(&self) -> Option<usize> {
        self.local_slot
    }

    pub fn local_player_name(&self) -> String {
        self.identity.display_name(self.local_player)
    }

    pub fn display_name(&self, id: PlayerId) -> String {
        self.identity.display_name(id)
    }

    pub fn server_name(&self) -> Option<&str> {
        self.session.server_info().map(|info| info.name.as_str())
    }

    pub fn round_stats(&self) -> RoundStats {
        self.stats
    }

    /// Seconds until the next round starts, while a round result is shown
    pub fn round_restart_countdown(&self) -> Option<f32> {
        if !self.game_state.is_round_over() {
            return None;
        }
        let elapsed = self.clock.now().duration_since(self.state_transition_time);
        Some(
            self.config
                .round_restart_delay
                .saturating_sub(elapsed)
                .as_secs_f32(),
        )
    }

    pub fn should_quit(&self) -> bool {
        self.game_state == GameState::Exiting
    }
}
