//! Short-lived bookkeeping tables: outbound frames awaiting
//! confirmation, and handshakes in flight.

use crate::protocol::{DeviceId, MessageId, Timestamp};
use std::collections::HashMap;
use std::net::SocketAddr;

/// One unconfirmed outbound frame.
#[derive(Debug, Clone, Copy)]
pub struct PendingAck {
    pub sent_at: Timestamp,
    pub peer: DeviceId,
}

/// Outstanding unacknowledged frames keyed by message id. Matching is
/// best-effort single-shot: whatever entry carries the incoming id is
/// resolved.
#[derive(Debug, Default)]
pub struct PendingAcks {
    entries: HashMap<MessageId, PendingAck>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, message_id: MessageId, peer: DeviceId, now: Timestamp) {
        self.entries.insert(
            message_id,
            PendingAck {
                sent_at: now,
                peer,
            },
        );
    }

    /// Remove and return the entry for a confirmed (or NACKed) frame.
    pub fn resolve(&mut self, message_id: MessageId) -> Option<PendingAck> {
        self.entries.remove(&message_id)
    }

    /// Drop every entry older than `timeout` and return the peers that
    /// owned them, once per expired entry, for loss accounting.
    pub fn sweep(&mut self, now: Timestamp, timeout: u64) -> Vec<DeviceId> {
        let mut expired = Vec::new();
        self.entries.retain(|_, entry| {
            if now.saturating_sub(entry.sent_at) > timeout {
                expired.push(entry.peer);
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One handshake in flight, on either side of the exchange.
#[derive(Debug, Clone, Copy)]
pub struct PendingHandshake {
    pub addr: SocketAddr,
    pub started_at: Timestamp,
}

/// In-flight handshakes keyed by seed.
#[derive(Debug, Default)]
pub struct PendingHandshakes {
    entries: HashMap<u8, PendingHandshake>,
}

impl PendingHandshakes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seed: u8, addr: SocketAddr, now: Timestamp) {
        self.entries.insert(
            seed,
            PendingHandshake {
                addr,
                started_at: now,
            },
        );
    }

    /// Remove and return the entry for a completing handshake.
    pub fn take(&mut self, seed: u8) -> Option<PendingHandshake> {
        self.entries.remove(&seed)
    }

    /// Used during seed generation to avoid clashing with a handshake
    /// that is still in flight.
    pub fn contains(&self, seed: u8) -> bool {
        self.entries.contains_key(&seed)
    }

    /// Drop entries older than `timeout`.
    pub fn sweep(&mut self, now: Timestamp, timeout: u64) {
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.started_at) <= timeout);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_removes_single_entry() {
        let mut acks = PendingAcks::new();
        acks.insert(5, 9, 0);
        assert_eq!(acks.resolve(5).map(|e| e.peer), Some(9));
        assert!(acks.resolve(5).is_none());
    }

    #[test]
    fn sweep_expires_only_old_entries() {
        let mut acks = PendingAcks::new();
        acks.insert(1, 9, 0);
        acks.insert(2, 9, 600);
        acks.insert(3, 4, 0);

        let mut expired = acks.sweep(1001, 1000);
        expired.sort_unstable();
        assert_eq!(expired, [4, 9]);
        assert_eq!(acks.len(), 1);

        // Entry at the boundary survives; expiry is strictly greater.
        assert!(acks.sweep(1600, 1000).is_empty());
        assert_eq!(acks.sweep(1601, 1000), [9]);
        assert!(acks.is_empty());
    }

    #[test]
    fn handshake_take_and_collision_check() {
        let addr: SocketAddr = "192.168.1.20:9000".parse().unwrap();
        let mut handshakes = PendingHandshakes::new();
        handshakes.insert(0x42, addr, 10);
        assert!(handshakes.contains(0x42));
        assert!(!handshakes.contains(0x43));

        let entry = handshakes.take(0x42).unwrap();
        assert_eq!(entry.addr, addr);
        assert_eq!(entry.started_at, 10);
        assert!(handshakes.take(0x42).is_none());
    }

    #[test]
    fn stale_handshakes_are_swept() {
        let addr: SocketAddr = "192.168.1.20:9000".parse().unwrap();
        let mut handshakes = PendingHandshakes::new();
        handshakes.insert(1, addr, 0);
        handshakes.insert(2, addr, 5_000);

        handshakes.sweep(10_001, 10_000);
        assert!(!handshakes.contains(1));
        assert!(handshakes.contains(2));
    }
}
