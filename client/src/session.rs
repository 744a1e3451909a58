//! One outbound connection to a game server
//!
//! A `ConnectionSession` owns the transport and at most one live connection
//! attempt. Starting a new attempt always tears the previous one down first,
//! and every attempt gets a fresh session token so that late datagrams from a
//! superseded attempt are dropped on arrival.

use crate::error::SessionError;
use crate::transport::{ConnectTarget, ConnectionHandle, Delivery, Transport};
use log::{debug, info, warn};
use shared::{decode, encode, Envelope, Packet, ServerId, SessionToken};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    /// Hello sent, waiting for the server to authenticate us
    PendingAuthentication,
    AuthenticatedAndActive,
    /// The link failed; the handle is released on the next `disconnect`
    Disconnected,
}

/// What the server told us about itself in reply to the hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub server_id: ServerId,
    pub secure: bool,
    pub name: String,
}

pub struct ConnectionSession {
    transport: Box<dyn Transport>,
    target: Option<ConnectTarget>,
    handle: Option<ConnectionHandle>,
    state: ConnectionState,
    token: SessionToken,
    next_token: SessionToken,
    connect_started: Instant,
    attempt_started: Instant,
    last_data_received: Instant,
    last_data_sent: Instant,
    server_info: Option<ServerInfo>,
    player_slot: Option<usize>,
}

impl ConnectionSession {
    pub fn new(transport: Box<dyn Transport>, now: Instant) -> Self {
        Self {
            transport,
            target: None,
            handle: None,
            state: ConnectionState::NotConnected,
            token: 0,
            next_token: 1,
            connect_started: now,
            attempt_started: now,
            last_data_received: now,
            last_data_sent: now,
            server_info: None,
            player_slot: None,
        }
    }

    /// Opens a fresh handle to `target` and sends `hello`.
    ///
    /// Any previous attempt or session is torn down first. Fails fast when the
    /// transport cannot reach the target; retrying is up to the caller.
    pub fn begin(
        &mut self,
        target: ConnectTarget,
        hello: Packet,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.disconnect();

        let handle = self.transport.open(&target)?;
        info!("Connecting to {} via {}", target, handle.peer);

        self.token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1).max(1);
        self.target = Some(target);
        self.handle = Some(handle);
        self.state = ConnectionState::PendingAuthentication;
        self.connect_started = now;
        self.attempt_started = now;
        self.last_data_received = now;

        if let Err(e) = self.transmit(hello, Delivery::Reliable, now) {
            // The attempt stays alive; the retry cadence re-sends the hello
            warn!("Initial hello to {} failed: {}", target, e);
        }
        Ok(())
    }

    /// Sends a packet on the live link. Rejected while not connected.
    pub fn send(
        &mut self,
        packet: Packet,
        delivery: Delivery,
        now: Instant,
    ) -> Result<(), SessionError> {
        match self.state {
            ConnectionState::NotConnected | ConnectionState::Disconnected => {
                Err(SessionError::NotConnected)
            }
            _ => self.transmit(packet, delivery, now),
        }
    }

    fn transmit(
        &mut self,
        packet: Packet,
        delivery: Delivery,
        now: Instant,
    ) -> Result<(), SessionError> {
        let handle = self.handle.ok_or(SessionError::NotConnected)?;
        let bytes = encode(&Envelope::new(self.token, packet))?;
        self.transport.send(handle, &bytes, delivery)?;
        self.last_data_sent = now;
        Ok(())
    }

    /// Drains the transport and returns the packets that belong to this attempt.
    pub fn receive(&mut self, now: Instant) -> Vec<Packet> {
        let Some(handle) = self.handle else {
            return Vec::new();
        };

        let mut packets = Vec::new();
        for datagram in self.transport.poll_received(handle) {
            if datagram.from != handle.peer {
                debug!("Dropping datagram from unexpected sender {}", datagram.from);
                continue;
            }

            let envelope = match decode(&datagram.bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("Failed to decode datagram from {}: {}", datagram.from, e);
                    continue;
                }
            };

            if envelope.session != self.token {
                debug!(
                    "Dropping {:?} for stale session {} (current {})",
                    envelope.packet.kind(),
                    envelope.session,
                    self.token
                );
                continue;
            }

            self.last_data_received = now;
            packets.push(envelope.packet);
        }

        packets
    }

    /// Leaves the server if connected. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::NotConnected {
            return;
        }

        if let Some(handle) = self.handle.take() {
            if self.state != ConnectionState::Disconnected {
                if let Ok(bytes) = encode(&Envelope::new(self.token, Packet::ClientLeaving)) {
                    if let Err(e) = self.transport.send(handle, &bytes, Delivery::Reliable) {
                        debug!("Leaving notice not delivered: {}", e);
                    }
                }
            }
            self.transport.close(handle);
        }

        info!("Disconnected from {:?}", self.target);
        self.state = ConnectionState::NotConnected;
        self.target = None;
        self.server_info = None;
        self.player_slot = None;
    }

    /// Marks the link as failed without releasing the handle yet.
    pub fn mark_disconnected(&mut self) {
        if self.state != ConnectionState::NotConnected {
            self.state = ConnectionState::Disconnected;
        }
    }

    pub fn mark_authenticated(&mut self, slot: usize, now: Instant) {
        self.state = ConnectionState::AuthenticatedAndActive;
        self.player_slot = Some(slot);
        self.last_data_received = now;
    }

    pub fn set_server_info(&mut self, info: ServerInfo) {
        self.server_info = Some(info);
    }

    pub fn refresh_attempt(&mut self, now: Instant) {
        self.attempt_started = now;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    pub fn target(&self) -> Option<ConnectTarget> {
        self.target
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn player_slot(&self) -> Option<usize> {
        self.player_slot
    }

    pub fn connect_started(&self) -> Instant {
        self.connect_started
    }

    pub fn attempt_started(&self) -> Instant {
        self.attempt_started
    }

    pub fn last_data_received(&self) -> Instant {
        self.last_data_received
    }

    pub fn last_data_sent(&self) -> Instant {
        self.last_data_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use shared::MessageKind;
    use std::net::SocketAddr;

    fn server_addr() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 27015))
    }

    fn hello() -> Packet {
        Packet::Hello { client_version: 1 }
    }

    fn session_with(network: &MemoryTransport) -> ConnectionSession {
        ConnectionSession::new(Box::new(network.clone()), Instant::now())
    }

    #[test]
    fn test_begin_sends_hello() {
        let network = MemoryTransport::new();
        let mut session = session_with(&network);

        session
            .begin(ConnectTarget::Address(server_addr()), hello(), Instant::now())
            .unwrap();

        assert_eq!(session.state(), ConnectionState::PendingAuthentication);
        let sent = network.sent_envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet.kind(), MessageKind::Hello);
        assert_eq!(sent[0].session, session.token());
    }

    #[test]
    fn test_new_attempt_tears_down_previous() {
        let network = MemoryTransport::new();
        let mut session = session_with(&network);
        let now = Instant::now();

        session
            .begin(ConnectTarget::Address(server_addr()), hello(), now)
            .unwrap();
        let first_token = session.token();
        session
            .begin(ConnectTarget::Address(server_addr()), hello(), now)
            .unwrap();

        assert_eq!(network.open_count(), 1);
        assert_ne!(session.token(), first_token);

        let kinds: Vec<_> = network
            .sent_envelopes()
            .iter()
            .map(|e| e.packet.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![MessageKind::Hello, MessageKind::ClientLeaving, MessageKind::Hello]
        );
    }

    #[test]
    fn test_send_rejected_when_not_connected() {
        let network = MemoryTransport::new();
        let mut session = session_with(&network);

        let result = session.send(
            Packet::ClientUpdate { payload: vec![1] },
            Delivery::Unreliable,
            Instant::now(),
        );

        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert!(network.sent().is_empty());
    }

    #[test]
    fn test_receive_filters_stale_and_foreign_datagrams() {
        let network = MemoryTransport::new();
        let mut session = session_with(&network);
        session
            .begin(ConnectTarget::Address(server_addr()), hello(), Instant::now())
            .unwrap();
        let token = session.token();

        let stranger = SocketAddr::from(([10, 0, 0, 2], 27015));
        network.deliver_envelope(stranger, &Envelope::new(token, Packet::ServerExiting));
        network.deliver_envelope(server_addr(), &Envelope::new(token + 7, Packet::ServerExiting));
        network.deliver(server_addr(), vec![0xde, 0xad]);
        network.deliver_envelope(server_addr(), &Envelope::new(token, Packet::ServerExiting));

        let packets = session.receive(Instant::now());
        assert_eq!(packets, vec![Packet::ServerExiting]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let network = MemoryTransport::new();
        let mut session = session_with(&network);
        session
            .begin(ConnectTarget::Address(server_addr()), hello(), Instant::now())
            .unwrap();

        session.disconnect();
        session.disconnect();

        assert_eq!(session.state(), ConnectionState::NotConnected);
        assert_eq!(network.open_count(), 0);
        let leaving = network
            .sent_envelopes()
            .iter()
            .filter(|e| e.packet == Packet::ClientLeaving)
            .count();
        assert_eq!(leaving, 1);
    }

    #[test]
    fn test_failed_link_skips_leaving_notice() {
        let network = MemoryTransport::new();
        let mut session = session_with(&network);
        session
            .begin(ConnectTarget::Address(server_addr()), hello(), Instant::now())
            .unwrap();
        network.clear_sent();

        session.mark_disconnected();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.disconnect();

        assert!(network.sent().is_empty());
        assert_eq!(session.state(), ConnectionState::NotConnected);
    }

    #[test]
    fn test_unreachable_target_fails_fast() {
        let network = MemoryTransport::new();
        network.set_unreachable(true);
        let mut session = session_with(&network);

        let result = session.begin(ConnectTarget::Address(server_addr()), hello(), Instant::now());

        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert_eq!(session.state(), ConnectionState::NotConnected);
        assert!(!session.is_live());
    }
}
