//! Integration tests for the client session state machine
//!
//! The in-memory scenarios drive `Client` frame by frame with a manual clock,
//! so every timeout is deterministic. The UDP tests run the client against
//! the reference server over real sockets.

use assert_approx_eq::assert_approx_eq;
use client::clock::ManualClock;
use client::config::ClientConfig;
use client::game::GameState;
use client::identity::StaticIdentity;
use client::matchmaking::{lobby_event_channel, LobbyMember, LoopbackMatchmaking, MatchmakingBridge};
use client::menu::{LobbyAction, LobbyBrowserEntry, LobbyMemberSelection, MenuSelection};
use client::network::Client;
use client::session::ConnectionState;
use client::transport::{ConnectTarget, MemoryTransport};
use shared::{
    Envelope, MessageKind, Packet, PlayerId, PlayerUpdate, ServerId, ServerPhase,
    ServerUpdate, MAX_PLAYERS_PER_SERVER,
};
use std::net::SocketAddr;
use std::time::Duration;

const LOCAL: PlayerId = PlayerId(0xA11CE);

fn server_addr() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], 27015))
}

fn other_server_addr() -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 2], 27015))
}

/// A client wired to in-memory collaborators the test keeps handles to
struct TestClient {
    client: Client,
    network: MemoryTransport,
    clock: ManualClock,
}

impl TestClient {
    fn new() -> Self {
        Self::with_matchmaking(|service| service)
    }

    fn with_matchmaking<F>(setup: F) -> Self
    where
        F: FnOnce(LoopbackMatchmaking) -> LoopbackMatchmaking,
    {
        let network = MemoryTransport::new();
        let clock = ManualClock::new();
        let (events, receiver) = lobby_event_channel();
        let service = setup(
            LoopbackMatchmaking::new(events, LOCAL)
                .with_game_server(ConnectTarget::Address(server_addr())),
        );

        let client = Client::new(
            ClientConfig::default(),
            Box::new(network.clone()),
            Box::new(StaticIdentity::new(LOCAL, "Alice")),
            MatchmakingBridge::new(Box::new(service), receiver),
            Box::new(clock.clone()),
        );

        Self {
            client,
            network,
            clock,
        }
    }

    /// Session token of the most recent attempt, as seen on the wire
    fn token(&self) -> u32 {
        self.network
            .sent_envelopes()
            .last()
            .map(|e| e.session)
            .expect("client has not sent anything")
    }

    fn server_sends(&self, packet: Packet) {
        self.server_sends_with(self.token(), packet);
    }

    fn server_sends_with(&self, token: u32, packet: Packet) {
        self.network
            .deliver_envelope(server_addr(), &Envelope::new(token, packet));
    }

    fn server_info() -> Packet {
        Packet::ServerInfo {
            server_id: ServerId(9),
            secure: true,
            server_name: "Arena".to_string(),
        }
    }

    fn auth_ok(slot: u32) -> Packet {
        Packet::AuthResponse {
            success: true,
            player_slot: slot,
            reason: String::new(),
        }
    }

    fn connect(&mut self, slot: u32) {
        self.client
            .initiate_server_connection(ConnectTarget::Address(server_addr()));
        self.server_sends(Self::server_info());
        self.client.run_frame();
        self.server_sends(Self::auth_ok(slot));
        self.client.run_frame();
    }

    /// Advances time in frame-sized steps, running a frame after each
    fn run_for(&mut self, total: Duration) {
        let step = Duration::from_millis(16);
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.clock.advance(step);
            self.client.run_frame();
            elapsed += step;
        }
    }

    fn sent_kinds(&self) -> Vec<MessageKind> {
        self.network
            .sent_envelopes()
            .iter()
            .map(|e| e.packet.kind())
            .collect()
    }
}

fn snapshot(phase: ServerPhase, players: &[(usize, PlayerId)]) -> Packet {
    let mut update = ServerUpdate::empty(phase);
    for (slot, id) in players {
        update.players[*slot] = Some(PlayerUpdate {
            identity: *id,
            score: 0,
            ship: vec![1, 2, 3],
        });
    }
    Packet::ServerUpdate(update)
}

/// One client against a scripted server
mod scenario_tests {
    use super::*;

    /// The server never answers
    #[test]
    fn unanswered_handshake_times_out() {
        let mut t = TestClient::new();
        t.client
            .initiate_server_connection(ConnectTarget::Address(server_addr()));
        assert_eq!(t.client.current_game_state(), GameState::Connecting);

        t.run_for(Duration::from_millis(5200));

        assert_eq!(t.client.current_game_state(), GameState::ConnectionFailure);
        assert_eq!(t.client.last_error_text(), "Timed out connecting to game server");
        assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);

        let hellos = t
            .sent_kinds()
            .into_iter()
            .filter(|k| *k == MessageKind::Hello)
            .count();
        assert!(hellos >= 9, "expected periodic hello retries, got {}", hellos);
    }

    /// Full handshake into slot 2
    #[test]
    fn successful_handshake_seats_local_player() {
        let mut t = TestClient::new();
        t.connect(2);

        assert_eq!(t.client.current_game_state(), GameState::WaitingForPlayers);
        assert_eq!(t.client.connection_state(), ConnectionState::AuthenticatedAndActive);
        assert_eq!(t.client.player_roster()[2].identity, Some(LOCAL));
        assert!(t.client.player_roster()[2].has_ship);
        assert_eq!(t.client.server_name(), Some("Arena"));
        assert_eq!(
            t.sent_kinds(),
            vec![MessageKind::Hello, MessageKind::BeginAuthentication]
        );
    }

    /// Server exits after declaring a winner
    #[test]
    fn server_exit_leaves_game_and_clears_roster() {
        let mut t = TestClient::new();
        t.connect(0);
        t.server_sends(snapshot(
            ServerPhase::Winner,
            &[(0, LOCAL), (1, PlayerId(2))],
        ));
        t.client.run_frame();
        assert_eq!(t.client.current_game_state(), GameState::Winner);

        t.server_sends(Packet::ServerExiting);
        t.client.run_frame();

        assert_eq!(t.client.current_game_state(), GameState::ConnectionFailure);
        assert_eq!(t.client.last_error_text(), "Game server has exited");
        assert!(t.client.player_roster().iter().all(|e| e.identity.is_none()));
        assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);
    }

    /// Joining a lobby from the browser
    #[test]
    fn lobby_membership_appears_only_after_entry_event() {
        let mut hosted = None;
        let mut t = TestClient::with_matchmaking(|mut service| {
            hosted = Some(service.host_lobby(vec![LobbyMember::new(PlayerId(77))]));
            service
        });
        let lobby = hosted.unwrap();

        t.client
            .on_menu_selection(MenuSelection::LobbyBrowser(LobbyBrowserEntry {
                target_state: GameState::JoiningLobby,
                lobby,
            }));

        assert_eq!(t.client.current_game_state(), GameState::JoiningLobby);
        assert!(t.client.lobby().is_none());

        t.client.run_frame();

        assert_eq!(t.client.current_game_state(), GameState::InLobby);
        let members: Vec<PlayerId> = t
            .client
            .lobby()
            .unwrap()
            .members
            .iter()
            .map(|m| m.identity)
            .collect();
        assert_eq!(members, vec![PlayerId(77), LOCAL]);
    }

    /// Sending while not connected
    #[test]
    fn send_without_connection_fails_without_touching_transport() {
        let mut t = TestClient::new();

        assert!(!t.client.send_server_data(b"fire", true));
        assert!(!t.client.send_server_data(b"fire", false));
        assert!(t.network.sent().is_empty());
    }
}

/// Guarantees that hold across call sequences
mod property_tests {
    use super::*;

    #[test]
    fn new_attempt_tears_down_previous_one() {
        let mut t = TestClient::new();
        t.client
            .initiate_server_connection(ConnectTarget::Address(server_addr()));
        let first = t.token();

        t.client
            .initiate_server_connection(ConnectTarget::Address(server_addr()));
        let second = t.token();

        assert_ne!(first, second);
        assert_eq!(t.network.open_count(), 1);
        assert!(t.sent_kinds().contains(&MessageKind::ClientLeaving));

        // The first attempt's reply must not authenticate the second one
        t.server_sends_with(first, TestClient::auth_ok(1));
        t.client.run_frame();
        assert_eq!(t.client.connection_state(), ConnectionState::PendingAuthentication);
        assert_eq!(t.client.current_game_state(), GameState::Connecting);
    }

    #[test]
    fn gameplay_update_before_authentication_is_ignored() {
        let mut t = TestClient::new();
        t.client
            .initiate_server_connection(ConnectTarget::Address(server_addr()));

        t.server_sends(snapshot(ServerPhase::Active, &[(0, PlayerId(5)), (1, PlayerId(6))]));
        t.client.run_frame();
        assert!(t.client.player_roster().iter().all(|e| e.identity.is_none()));
        assert_eq!(t.client.current_game_state(), GameState::Connecting);

        t.server_sends(TestClient::server_info());
        t.server_sends(snapshot(ServerPhase::Active, &[(0, PlayerId(5))]));
        t.client.run_frame();
        assert!(t.client.player_roster().iter().all(|e| e.identity.is_none()));
    }

    #[test]
    fn replayed_auth_response_does_not_reseat_player() {
        let mut t = TestClient::new();
        t.connect(1);

        t.server_sends(TestClient::auth_ok(3));
        t.client.run_frame();

        assert_eq!(t.client.local_slot(), Some(1));
        assert_eq!(t.client.player_roster()[3].identity, None);
    }

    #[test]
    fn disconnect_is_idempotent_from_any_state() {
        let mut t = TestClient::new();
        t.client.disconnect_from_server();
        t.client.disconnect_from_server();
        assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);

        t.client
            .initiate_server_connection(ConnectTarget::Address(server_addr()));
        t.client.disconnect_from_server();
        t.client.disconnect_from_server();
        assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);

        t.network.clear_sent();
        t.connect(0);
        t.client.disconnect_from_server();
        t.client.disconnect_from_server();
        assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);
        let leaving = t
            .sent_kinds()
            .into_iter()
            .filter(|k| *k == MessageKind::ClientLeaving)
            .count();
        assert_eq!(leaving, 1);
        assert!(t.client.last_error_text().is_empty());
    }

    #[test]
    fn liveness_loss_transitions_exactly_once() {
        let mut t = TestClient::new();
        t.connect(0);
        t.server_sends(snapshot(ServerPhase::Active, &[(0, LOCAL)]));
        t.client.run_frame();
        assert_eq!(t.client.current_game_state(), GameState::Active);

        let mut transitions = 0;
        let mut previous = t.client.current_game_state();
        for _ in 0..600 {
            t.clock.advance(Duration::from_millis(16));
            t.client.run_frame();
            let state = t.client.current_game_state();
            if state != previous {
                transitions += 1;
                previous = state;
            }
        }

        assert_eq!(transitions, 1);
        assert_eq!(t.client.current_game_state(), GameState::ConnectionFailure);
        assert_eq!(t.client.last_error_text(), "Game server connection failure");
        assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);
    }

    #[test]
    fn keepalives_hold_the_link_while_server_talks() {
        let mut t = TestClient::new();
        t.connect(0);
        t.network.clear_sent();

        for _ in 0..10 {
            t.run_for(Duration::from_secs(1));
            t.server_sends(snapshot(ServerPhase::Active, &[(0, LOCAL)]));
        }

        assert_eq!(t.client.connection_state(), ConnectionState::AuthenticatedAndActive);
        assert!(t.sent_kinds().iter().all(|k| *k == MessageKind::ClientUpdate));
        assert!(t.sent_kinds().len() >= 5);
    }

    #[test]
    fn roster_slots_keep_ship_and_identity_together() {
        let mut t = TestClient::new();
        t.connect(0);

        let layouts: [&[(usize, PlayerId)]; 4] = [
            &[(0, LOCAL)],
            &[(0, LOCAL), (3, PlayerId(3))],
            &[(1, PlayerId(1)), (2, PlayerId(2)), (3, PlayerId(3))],
            &[],
        ];
        for layout in layouts {
            t.server_sends(snapshot(ServerPhase::Active, layout));
            t.client.run_frame();

            let roster = t.client.player_roster();
            assert_eq!(roster.len(), MAX_PLAYERS_PER_SERVER);
            for entry in roster {
                assert_eq!(entry.has_ship, entry.identity.is_some());
            }
        }
    }

    #[test]
    fn manual_connection_wins_over_late_lobby_game_start() {
        let mut t = TestClient::new();
        t.client.on_menu_selection(GameState::CreatingLobby.into());
        t.client.run_frame();
        assert_eq!(t.client.current_game_state(), GameState::InLobby);

        // Start is requested, but the user connects elsewhere before the event is drained
        t.client
            .on_menu_selection(MenuSelection::LobbyMember(LobbyMemberSelection {
                member: LOCAL,
                action: LobbyAction::StartGame,
            }));
        t.client
            .initiate_server_connection(ConnectTarget::Address(other_server_addr()));
        t.client.run_frame();

        assert_eq!(t.client.current_game_state(), GameState::Connecting);
        let last = t.network.sent().last().cloned().unwrap();
        assert_eq!(last.peer, other_server_addr());
        assert!(t.client.lobby().is_none());
    }

    #[test]
    fn abandoned_lobby_creation_settles_on_one_lobby() {
        let mut t = TestClient::new();
        t.client.on_menu_selection(GameState::CreatingLobby.into());
        t.client.on_menu_selection(GameState::Menu.into());
        t.client.on_menu_selection(GameState::CreatingLobby.into());

        t.client.run_frame();
        let shown = t.client.lobby().map(|l| l.id);
        assert_eq!(t.client.current_game_state(), GameState::InLobby);
        assert!(shown.is_some());

        // Results for the lobby that was not kept must not pull us out
        t.client.run_frame();
        assert_eq!(t.client.current_game_state(), GameState::InLobby);
        assert_eq!(t.client.lobby().map(|l| l.id), shown);
    }

    #[test]
    fn round_result_counts_down_to_next_round() {
        let mut t = TestClient::new();
        t.connect(1);
        t.server_sends(snapshot(ServerPhase::Active, &[(0, PlayerId(9)), (1, LOCAL)]));
        t.client.run_frame();

        let mut update = ServerUpdate::empty(ServerPhase::Winner);
        update.winner = Some(1);
        update.players[1] = Some(PlayerUpdate {
            identity: LOCAL,
            score: 1,
            ship: Vec::new(),
        });
        t.server_sends(Packet::ServerUpdate(update));
        t.client.run_frame();
        assert!(t.client.local_player_won_last_game());

        t.clock.advance(Duration::from_millis(2000));
        assert_approx_eq!(t.client.round_restart_countdown().unwrap(), 3.0, 0.001);
        assert_eq!(t.client.round_stats().won, 1);

        t.server_sends(snapshot(ServerPhase::Active, &[(1, LOCAL)]));
        t.client.run_frame();
        assert_eq!(t.client.round_restart_countdown(), None);
    }

    #[test]
    fn lobby_game_start_routes_by_server_identity() {
        let mut t = TestClient::with_matchmaking(|service| {
            service.with_game_server(ConnectTarget::Server(ServerId(9)))
        });
        t.network.register_server(ServerId(9), server_addr());

        t.client.on_menu_selection(GameState::CreatingLobby.into());
        t.client.run_frame();
        t.client
            .on_menu_selection(MenuSelection::LobbyMember(LobbyMemberSelection {
                member: LOCAL,
                action: LobbyAction::StartGame,
            }));
        t.client.run_frame();
        assert_eq!(t.client.current_game_state(), GameState::Connecting);
        assert_eq!(t.network.sent().last().unwrap().peer, server_addr());

        t.server_sends(TestClient::server_info());
        t.client.run_frame();
        t.server_sends(TestClient::auth_ok(0));
        t.client.run_frame();

        assert_eq!(t.client.current_game_state(), GameState::WaitingForPlayers);
        assert!(t.client.lobby().is_none());
    }

    #[test]
    fn browsing_away_mid_handshake_ignores_late_replies() {
        for browser in [
            GameState::FindLobby,
            GameState::FindLanServers,
            GameState::FindInternetServers,
            GameState::CreatingLobby,
            GameState::JoiningLobby,
        ] {
            let mut t = TestClient::new();
            t.client
                .initiate_server_connection(ConnectTarget::Address(server_addr()));
            let token = t.token();
            t.client.on_menu_selection(browser.into());
            assert_eq!(t.client.connection_state(), ConnectionState::NotConnected);

            t.server_sends_with(token, TestClient::server_info());
            t.server_sends_with(token, TestClient::auth_ok(0));
            t.client.run_frame();
            t.run_for(Duration::from_secs(6));

            assert_ne!(t.client.current_game_state(), GameState::WaitingForPlayers);
            assert_ne!(t.client.current_game_state(), GameState::ConnectionFailure);
            assert_eq!(t.client.local_slot(), None);
        }
    }

    #[test]
    fn held_lobby_never_coexists_with_game() {
        let mut t = TestClient::new();
        let check = |t: &TestClient| {
            let state = t.client.current_game_state();
            assert!(
                !(t.client.lobby().is_some() && state.is_in_game()),
                "lobby held while in {:?}",
                state
            );
        };

        t.connect(0);
        t.client.on_menu_selection(GameState::CreatingLobby.into());
        check(&t);
        t.client.run_frame();
        check(&t);
        assert_eq!(t.client.current_game_state(), GameState::InLobby);

        // Stragglers from the abandoned session
        t.server_sends(snapshot(ServerPhase::Active, &[(0, LOCAL)]));
        t.client.run_frame();
        check(&t);
        t.server_sends(snapshot(ServerPhase::Winner, &[(0, LOCAL)]));
        t.client.run_frame();
        check(&t);
        assert_eq!(t.client.current_game_state(), GameState::InLobby);

        t.client
            .on_menu_selection(MenuSelection::LobbyMember(LobbyMemberSelection {
                member: LOCAL,
                action: LobbyAction::StartGame,
            }));
        t.client.run_frame();
        check(&t);
        t.server_sends(TestClient::server_info());
        t.client.run_frame();
        t.server_sends(TestClient::auth_ok(2));
        t.client.run_frame();
        check(&t);
        assert_eq!(t.client.current_game_state(), GameState::WaitingForPlayers);
        assert_eq!(t.client.local_slot(), Some(2));
    }

    #[test]
    fn server_update_ignored_while_in_quit_menu() {
        let mut t = TestClient::new();
        t.connect(0);
        t.client.on_menu_selection(GameState::QuitMenu.into());

        t.server_sends(snapshot(ServerPhase::Active, &[(0, LOCAL)]));
        t.client.run_frame();

        assert_eq!(t.client.current_game_state(), GameState::QuitMenu);
    }
}

/// Client and server over real sockets
mod udp_tests {
    use super::*;
    use client::clock::SystemClock;
    use client::transport::UdpTransport;
    use server::network::{Server, ServerConfig, ServerMessage};
    use tokio::time::sleep;

    async fn start_server(min_players: usize) -> (SocketAddr, tokio::sync::mpsc::UnboundedSender<ServerMessage>) {
        start_server_with(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            name: "Integration".to_string(),
            tick_duration: Duration::from_millis(20),
            min_players,
            ..ServerConfig::default()
        })
        .await
    }

    async fn start_server_with(
        config: ServerConfig,
    ) -> (SocketAddr, tokio::sync::mpsc::UnboundedSender<ServerMessage>) {
        let mut server = Server::new(config).await.expect("Failed to start server");
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move { server.run().await });
        (addr, shutdown)
    }

    fn udp_client(name: &str, config: ClientConfig) -> Client {
        udp_client_with(name, config, UdpTransport::new())
    }

    fn udp_client_with(name: &str, config: ClientConfig, transport: UdpTransport) -> Client {
        let identity = StaticIdentity::from_name(name);
        let local = client::identity::IdentityProvider::local_identity(&identity);
        let (events, receiver) = lobby_event_channel();
        Client::new(
            config,
            Box::new(transport),
            Box::new(identity),
            MatchmakingBridge::new(Box::new(LoopbackMatchmaking::new(events, local)), receiver),
            Box::new(SystemClock),
        )
    }

    /// Runs frames until `done` holds or two seconds pass
    async fn run_until<F: Fn(&Client) -> bool>(clients: &mut [&mut Client], done: F) -> bool {
        for _ in 0..200 {
            for client in clients.iter_mut() {
                client.run_frame();
            }
            if clients.iter().all(|c| done(&**c)) {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_connects_to_real_server() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (addr, shutdown) = start_server(2).await;
        let mut alice = udp_client("Alice", ClientConfig::default());
        let mut bob = udp_client("Bob", ClientConfig::default());

        alice.initiate_server_connection(ConnectTarget::Address(addr));
        assert!(
            run_until(&mut [&mut alice], |c| c.current_game_state() == GameState::WaitingForPlayers).await
        );
        assert_eq!(alice.server_name(), Some("Integration"));
        assert_eq!(alice.local_slot(), Some(0));
        assert!(alice.send_server_data(&[1, 2, 3], false));

        bob.initiate_server_connection(ConnectTarget::Address(addr));
        assert!(
            run_until(&mut [&mut alice, &mut bob], |c| {
                c.current_game_state() == GameState::Active
            })
            .await
        );
        assert_eq!(bob.local_slot(), Some(1));
        assert_eq!(
            alice.player_roster()[1].identity,
            Some(bob.local_player())
        );

        tokio_test::assert_ok!(shutdown.send(ServerMessage::Shutdown));
        assert!(
            run_until(&mut [&mut alice, &mut bob], |c| {
                c.current_game_state() == GameState::ConnectionFailure
            })
            .await
        );
        assert_eq!(alice.last_error_text(), "Game server has exited");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn client_reaches_server_by_identity() {
        let (addr, shutdown) = start_server_with(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            name: "Routed".to_string(),
            tick_duration: Duration::from_millis(20),
            min_players: 1,
            server_id: Some(ServerId(0x5EED)),
            ..ServerConfig::default()
        })
        .await;
        let transport = UdpTransport::new().with_route(ServerId(0x5EED), addr);
        let mut dave = udp_client_with("Dave", ClientConfig::default(), transport);

        dave.initiate_server_connection(ConnectTarget::Server(ServerId(0x5EED)));
        assert!(run_until(&mut [&mut dave], |c| c.current_game_state() == GameState::Active).await);
        assert_eq!(dave.server_name(), Some("Routed"));

        tokio_test::assert_ok!(shutdown.send(ServerMessage::Shutdown));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn silent_address_times_out() {
        // Bound but never read: nothing will answer the hello
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();

        let config = ClientConfig {
            retry_interval: Duration::from_millis(50),
            handshake_timeout: Duration::from_millis(300),
            ..ClientConfig::default()
        };
        let mut client = udp_client("Carol", config);

        client.initiate_server_connection(ConnectTarget::Address(addr));
        assert!(
            run_until(&mut [&mut client], |c| c.current_game_state() == GameState::ConnectionFailure).await
        );
        assert_eq!(client.last_error_text(), "Timed out connecting to game server");
    }
}
