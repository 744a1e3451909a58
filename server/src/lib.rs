//! # Game Server Library
//!
//! Reference authoritative server for the SpaceWar client. It speaks the
//! connection handshake, hands out player slots and broadcasts a complete
//! world snapshot every tick. Gameplay simulation is not part of it: ship
//! state is whatever the owning client last sent.
//!
//! ## Architecture Design
//!
//! ### Task Layout
//! Three tokio tasks surround a single main loop:
//! - the receiver decodes datagrams and forwards them over a channel
//! - the sender drains the outgoing queue, expanding broadcasts per client
//! - the timeout checker frees slots of clients that went silent
//!
//! The main loop owns all decisions and runs them sequentially.
//!
//! ### Sessions
//! Each client connection attempt carries a session token picked by the
//! client. The server echoes it on every reply and treats (address, token)
//! as the client's identity, so a client that restarts its handshake gets a
//! clean slot instead of inheriting the old one.
//!
//! ## Module Organization
//!
//! - `client_manager`: slot table, pending handshakes, timeouts, snapshots
//! - `network`: socket tasks, handshake replies and the tick loop
//! - `error`: `ServerError`

pub mod client_manager;
pub mod error;
pub mod network;
