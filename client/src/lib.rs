//! # SpaceWar Client Library
//!
//! Client-side connection and session management for a small multiplayer
//! space combat game. The crate owns everything between "the user picked a
//! menu entry" and "the renderer shows the roster": the game-state machine,
//! the connection handshake with an authoritative game server, liveness
//! monitoring and the lobby flow provided by an external matchmaking service.
//!
//! ## Architecture Overview
//!
//! Everything runs on the render thread. `network::Client::run_frame` is
//! called once per frame and never blocks; collaborators that produce work
//! asynchronously (the transport, the matchmaking service) queue it, and the
//! frame drains those queues in a fixed order.
//!
//! ### Connection Lifecycle
//! A connection goes `NotConnected → PendingAuthentication →
//! AuthenticatedAndActive`, and drops to `Disconnected` on any failure before
//! being torn down. Each attempt carries a fresh session token, so datagrams
//! from an abandoned attempt are discarded rather than applied.
//!
//! ### Lobby Flow
//! Lobby creation, joining and game start are fire-and-forget requests. Their
//! results arrive as `matchmaking::LobbyEvent`s; results that no longer match
//! what the user is doing are dropped.
//!
//! ## Module Organization
//!
//! - `transport`, `session`, `handshake`: the wire side, from raw datagrams up
//!   to an authenticated session
//! - `matchmaking`: lobby requests and their queued results
//! - `game`, `menu`: the state enumeration, the roster and menu selections
//! - `network`: the `Client` orchestrator tying it all together
//! - `input`, `rendering`: thin macroquad adapters for the binary
//! - `clock`, `config`, `error`, `identity`: injected collaborators
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::clock::SystemClock;
//! use client::config::ClientConfig;
//! use client::identity::{IdentityProvider, StaticIdentity};
//! use client::matchmaking::{lobby_event_channel, LoopbackMatchmaking, MatchmakingBridge};
//! use client::network::Client;
//! use client::transport::{ConnectTarget, UdpTransport};
//!
//! let identity = StaticIdentity::from_name("Alice");
//! let (events, receiver) = lobby_event_channel();
//! let matchmaking = LoopbackMatchmaking::new(events, identity.local_identity());
//!
//! let mut client = Client::new(
//!     ClientConfig::default(),
//!     Box::new(UdpTransport::new()),
//!     Box::new(identity),
//!     MatchmakingBridge::new(Box::new(matchmaking), receiver),
//!     Box::new(SystemClock),
//! );
//!
//! client.initiate_server_connection(ConnectTarget::Address("127.0.0.1:27015".parse().unwrap()));
//! while !client.should_quit() {
//!     client.run_frame();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod game;
pub mod handshake;
pub mod identity;
pub mod input;
pub mod matchmaking;
pub mod menu;
pub mod network;
pub mod rendering;
pub mod session;
pub mod transport;
