//! Client tuning knobs for connection retries and timeouts

use shared::PROTOCOL_VERSION;
use std::time::Duration;

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_ROUND_RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Protocol version announced in the hello message
    pub client_version: u32,
    /// How long to wait before re-sending an unanswered handshake message
    pub retry_interval: Duration,
    /// Overall ceiling for the handshake; never refreshed by retries
    pub handshake_timeout: Duration,
    /// Maximum server silence once authenticated
    pub liveness_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Drives the countdown shown between rounds
    pub round_restart_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_version: PROTOCOL_VERSION,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            round_restart_delay: DEFAULT_ROUND_RESTART_DELAY,
        }
    }
}
