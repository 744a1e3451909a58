//! Handshake driver on top of `ConnectionSession`
//!
//! The exchange is hello → server-info → begin-authentication → auth-response.
//! `SessionAuthenticator` reacts to the two server messages and enforces the
//! per-frame timing policy:
//! - re-send the outstanding handshake message every `retry_interval`
//! - give up once `handshake_timeout` has passed since the attempt began
//! - declare an authenticated link lost after `liveness_timeout` of silence

use crate::config::ClientConfig;
use crate::error::ConnectionFailure;
use crate::session::{ConnectionSession, ConnectionState, ServerInfo};
use crate::transport::Delivery;
use log::{debug, info, warn};
use shared::{Packet, PlayerId, MAX_PLAYERS_PER_SERVER};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Server answered the hello; authentication is still outstanding
    ServerInfoReceived,
    Authenticated { slot: usize },
    Failed(ConnectionFailure),
    /// Message did not apply to the current sub-state
    Ignored,
}

pub struct SessionAuthenticator {
    config: ClientConfig,
    identity: PlayerId,
    name: String,
}

impl SessionAuthenticator {
    pub fn new(config: ClientConfig, identity: PlayerId, name: String) -> Self {
        Self {
            config,
            identity,
            name,
        }
    }

    pub fn hello(&self) -> Packet {
        Packet::Hello {
            client_version: self.config.client_version,
        }
    }

    fn begin_authentication(&self) -> Packet {
        Packet::BeginAuthentication {
            identity: self.identity,
            name: self.name.clone(),
        }
    }

    /// Records the server's identity and asks it to authenticate us.
    /// This never completes authentication by itself.
    pub fn on_server_info(
        &self,
        session: &mut ConnectionSession,
        info: ServerInfo,
        now: Instant,
    ) -> HandshakeEvent {
        if session.state() != ConnectionState::PendingAuthentication {
            return HandshakeEvent::Ignored;
        }

        info!(
            "Server info: '{}' ({}, {})",
            info.name,
            info.server_id,
            if info.secure { "secure" } else { "insecure" }
        );
        session.set_server_info(info);
        session.refresh_attempt(now);

        if let Err(e) = session.send(self.begin_authentication(), Delivery::Reliable, now) {
            warn!("Failed to send authentication request: {}", e);
        }
        HandshakeEvent::ServerInfoReceived
    }

    pub fn on_auth_response(
        &self,
        session: &mut ConnectionSession,
        success: bool,
        player_slot: u32,
        reason: &str,
        now: Instant,
    ) -> HandshakeEvent {
        if session.state() != ConnectionState::PendingAuthentication {
            return HandshakeEvent::Ignored;
        }

        let slot = player_slot as usize;
        if success && slot < MAX_PLAYERS_PER_SERVER {
            info!("Authenticated, assigned slot {}", slot);
            session.mark_authenticated(slot, now);
            return HandshakeEvent::Authenticated { slot };
        }

        let reason = if success {
            format!("server assigned invalid slot {}", player_slot)
        } else if reason.is_empty() {
            "Server rejected authentication".to_string()
        } else {
            reason.to_string()
        };
        warn!("Authentication failed: {}", reason);
        session.mark_disconnected();
        HandshakeEvent::Failed(ConnectionFailure::AuthenticationRejected(reason))
    }

    /// Per-frame timing checks. Returns a failure at most once per attempt,
    /// after which the caller tears the session down.
    pub fn poll(&self, session: &mut ConnectionSession, now: Instant) -> Option<ConnectionFailure> {
        match session.state() {
            ConnectionState::PendingAuthentication => {
                if now.duration_since(session.connect_started()) > self.config.handshake_timeout {
                    warn!("Handshake with {:?} timed out", session.target());
                    session.mark_disconnected();
                    return Some(ConnectionFailure::HandshakeTimeout);
                }

                if now.duration_since(session.attempt_started()) > self.config.retry_interval {
                    let packet = if session.server_info().is_some() {
                        self.begin_authentication()
                    } else {
                        self.hello()
                    };
                    debug!("Retrying {:?}", packet.kind());
                    if let Err(e) = session.send(packet, Delivery::Reliable, now) {
                        warn!("Handshake retry failed: {}", e);
                    }
                    session.refresh_attempt(now);
                }
                None
            }
            ConnectionState::AuthenticatedAndActive => {
                if now.duration_since(session.last_data_received()) > self.config.liveness_timeout
                {
                    warn!("No data from server for {:?}", self.config.liveness_timeout);
                    session.mark_disconnected();
                    return Some(ConnectionFailure::LivenessLost);
                }

                if now.duration_since(session.last_data_sent()) > self.config.keepalive_interval {
                    let keepalive = Packet::ClientUpdate {
                        payload: Vec::new(),
                    };
                    if let Err(e) = session.send(keepalive, Delivery::Unreliable, now) {
                        debug!("Keep-alive not sent: {}", e);
                    }
                }
                None
            }
            ConnectionState::NotConnected | ConnectionState::Disconnected => None,
        }
    }
}
