//! Client slot management for the game server
//!
//! This module tracks every client the server has heard from:
//! - Pending handshakes, keyed by address and session token
//! - Authenticated players and the slot each one occupies
//! - Activity timestamps for timeout detection
//!
//! A client is identified by the pair (address, session token). A hello with
//! a new token from a known address starts a new attempt and evicts whatever
//! that address held before.

use log::{debug, info};
use shared::{PlayerId, PlayerUpdate, ServerPhase, ServerUpdate, SessionToken};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A client that said hello but has not been given a slot yet
#[derive(Debug, Clone, Copy)]
struct PendingClient {
    session: SessionToken,
    last_seen: Instant,
}

/// An authenticated player occupying one slot
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub slot: usize,
    pub addr: SocketAddr,
    pub session: SessionToken,
    pub identity: PlayerId,
    pub name: String,
    pub score: u32,
    /// Last gameplay payload received, echoed back as the ship state
    pub ship: Vec<u8>,
    pub last_seen: Instant,
}

impl ConnectedClient {
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_seen) > timeout
    }
}

/// Outcome of an authentication request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted { slot: usize },
    Rejected { reason: String },
}

/// Owns the fixed slot table and the pending-handshake table
pub struct ClientManager {
    slots: Vec<Option<ConnectedClient>>,
    pending: HashMap<SocketAddr, PendingClient>,
}

impl ClientManager {
    /// Creates a manager with `max_clients` slots
    pub fn new(max_clients: usize) -> Self {
        Self {
            slots: vec![None; max_clients],
            pending: HashMap::new(),
        }
    }

    /// Records a hello. Returns the slot evicted if this address was already
    /// playing under a different session.
    pub fn register_hello(
        &mut self,
        addr: SocketAddr,
        session: SessionToken,
        now: Instant,
    ) -> Option<usize> {
        let evicted = match self.find_by_addr(addr) {
            Some(slot) if self.session_of(slot) != Some(session) => {
                info!("{} started a new session, freeing slot {}", addr, slot);
                self.slots[slot] = None;
                Some(slot)
            }
            _ => None,
        };

        self.pending.insert(
            addr,
            PendingClient {
                session,
                last_seen: now,
            },
        );
        evicted
    }

    /// Assigns a slot to the client at `addr`.
    ///
    /// A repeated request from an already admitted session gets the same slot
    /// back, so handshake retries are harmless.
    pub fn authenticate(
        &mut self,
        addr: SocketAddr,
        session: SessionToken,
        identity: PlayerId,
        name: String,
        now: Instant,
    ) -> Admission {
        if let Some(slot) = self.find_by_addr(addr) {
            if self.session_of(slot) == Some(session) {
                debug!("Repeated authentication from {} in slot {}", addr, slot);
                return Admission::Admitted { slot };
            }
            self.slots[slot] = None;
        }

        let Some(slot) = self.slots.iter().position(|s| s.is_none()) else {
            return Admission::Rejected {
                reason: "Server is full".to_string(),
            };
        };

        self.pending.remove(&addr);
        info!("{} ({}) joined from {} in slot {}", name, identity, addr, slot);
        self.slots[slot] = Some(ConnectedClient {
            slot,
            addr,
            session,
            identity,
            name,
            score: 0,
            ship: Vec::new(),
            last_seen: now,
        });
        Admission::Admitted { slot }
    }

    /// Returns the authenticated client behind (addr, session), if any
    pub fn client_mut(
        &mut self,
        addr: SocketAddr,
        session: SessionToken,
    ) -> Option<&mut ConnectedClient> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|c| c.addr == addr && c.session == session)
    }

    /// Records a gameplay update; an empty payload only counts as activity
    pub fn record_update(
        &mut self,
        addr: SocketAddr,
        session: SessionToken,
        payload: Vec<u8>,
        now: Instant,
    ) -> bool {
        match self.client_mut(addr, session) {
            Some(client) => {
                client.last_seen = now;
                if !payload.is_empty() {
                    client.ship = payload;
                }
                true
            }
            None => false,
        }
    }

    /// Removes the client behind (addr, session). Returns the freed slot.
    pub fn remove(&mut self, addr: SocketAddr, session: SessionToken) -> Option<usize> {
        if self
            .pending
            .get(&addr)
            .is_some_and(|p| p.session == session)
        {
            self.pending.remove(&addr);
        }

        let slot = self.client_mut(addr, session).map(|c| c.slot)?;
        if let Some(client) = self.slots[slot].take() {
            info!("{} left slot {}", client.name, slot);
        }
        Some(slot)
    }

    /// Drops silent clients and stale handshakes, returning the freed slots
    pub fn check_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<usize> {
        self.pending
            .retain(|_, pending| now.duration_since(pending.last_seen) <= timeout);

        let mut freed = Vec::new();
        for entry in self.slots.iter_mut() {
            if entry
                .as_ref()
                .is_some_and(|client| client.is_timed_out(now, timeout))
            {
                if let Some(client) = entry.take() {
                    info!("{} in slot {} timed out", client.name, client.slot);
                    freed.push(client.slot);
                }
            }
        }
        freed
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.slots
            .iter()
            .flatten()
            .find(|c| c.addr == addr)
            .map(|c| c.slot)
    }

    fn session_of(&self, slot: usize) -> Option<SessionToken> {
        self.slots.get(slot)?.as_ref().map(|c| c.session)
    }

    pub fn is_pending(&self, addr: SocketAddr, session: SessionToken) -> bool {
        self.pending
            .get(&addr)
            .is_some_and(|p| p.session == session)
    }

    /// (address, session) of every authenticated client, for broadcasts
    pub fn recipients(&self) -> Vec<(SocketAddr, SessionToken)> {
        self.slots
            .iter()
            .flatten()
            .map(|c| (c.addr, c.session))
            .collect()
    }

    /// Builds the snapshot every client receives this tick
    pub fn snapshot(&self, phase: ServerPhase) -> ServerUpdate {
        let mut update = ServerUpdate::empty(phase);
        update.players = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().map(|c| PlayerUpdate {
                    identity: c.identity,
                    score: c.score,
                    ship: c.ship.clone(),
                })
            })
            .collect();
        update
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
