//! Tunnel configuration: timeouts, keepalive cadence, and policy knobs.

use crate::error::{Result, TunnelError};
use crate::protocol::constants;

/// Engine-only configuration. All durations are in milliseconds, the
/// unit the injected clock reports.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Unconfirmed frames older than this count as lost.
    pub lost_packet_timeout: u64,
    /// Cadence of outbound keepalive pings per peer.
    pub ping_frequency: u64,
    /// Silence after which a connected peer is marked lost; also the
    /// lifetime of an unanswered handshake.
    pub stale_timeout: u64,
    /// Further silence after which a lost peer is dropped.
    pub disconnected_timeout: u64,
    /// Mark a peer lost once it exceeds this many unconfirmed frames.
    /// Zero disables the check.
    pub disconnect_on_lost_packets: u8,
    /// Version byte carried in handshake payloads.
    pub protocol_version: u8,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            lost_packet_timeout: constants::LOST_PACKET_TIMEOUT_MS,
            ping_frequency: constants::PING_FREQUENCY_MS,
            stale_timeout: constants::STALE_TIMEOUT_MS,
            disconnected_timeout: constants::DISCONNECTED_TIMEOUT_MS,
            disconnect_on_lost_packets: constants::DISCONNECT_ON_LOST_PACKETS,
            protocol_version: constants::PROTOCOL_VERSION,
        }
    }
}

impl TunnelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending-ack expiry in milliseconds.
    pub fn lost_packet_timeout(mut self, ms: u64) -> Self {
        self.lost_packet_timeout = ms;
        self
    }

    /// Set the keepalive cadence in milliseconds.
    pub fn ping_frequency(mut self, ms: u64) -> Self {
        self.ping_frequency = ms;
        self
    }

    /// Set the connected-to-lost silence threshold in milliseconds.
    pub fn stale_timeout(mut self, ms: u64) -> Self {
        self.stale_timeout = ms;
        self
    }

    /// Set the lost-to-removed silence threshold in milliseconds.
    pub fn disconnected_timeout(mut self, ms: u64) -> Self {
        self.disconnected_timeout = ms;
        self
    }

    /// Mark peers lost after this many unconfirmed frames; 0 disables.
    pub fn disconnect_on_lost_packets(mut self, count: u8) -> Self {
        self.disconnect_on_lost_packets = count;
        self
    }

    /// Advertise a different protocol version during handshakes.
    pub fn protocol_version(mut self, version: u8) -> Self {
        self.protocol_version = version;
        self
    }

    /// Reject configurations the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.lost_packet_timeout == 0 {
            return Err(TunnelError::config("lost_packet_timeout must be non-zero"));
        }
        if self.ping_frequency == 0 {
            return Err(TunnelError::config("ping_frequency must be non-zero"));
        }
        if self.stale_timeout == 0 {
            return Err(TunnelError::config("stale_timeout must be non-zero"));
        }
        if self.disconnected_timeout == 0 {
            return Err(TunnelError::config("disconnected_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = TunnelConfig::default();
        assert_eq!(config.lost_packet_timeout, 1000);
        assert_eq!(config.ping_frequency, 1000);
        assert_eq!(config.stale_timeout, 10_000);
        assert_eq!(config.disconnected_timeout, 10_000);
        assert_eq!(config.disconnect_on_lost_packets, 0);
        assert_eq!(config.protocol_version, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_setters_apply() {
        let config = TunnelConfig::new()
            .lost_packet_timeout(250)
            .ping_frequency(500)
            .disconnect_on_lost_packets(3);
        assert_eq!(config.lost_packet_timeout, 250);
        assert_eq!(config.ping_frequency, 500);
        assert_eq!(config.disconnect_on_lost_packets, 3);
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        assert!(TunnelConfig::new().ping_frequency(0).validate().is_err());
        assert!(TunnelConfig::new().stale_timeout(0).validate().is_err());
    }
}
