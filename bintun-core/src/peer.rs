//! Peer table: per-device liveness state, counters and timestamps.

use crate::protocol::{DeviceId, Timestamp};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Lifecycle of a known peer. Transitions are driven by the tunnel:
/// `Connected -> Lost` on silence or loss, `Lost -> Connected` on fresh
/// traffic, `-> Disconnected` just before removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    Lost,
    Disconnected,
}

/// Everything the tunnel tracks about one remote device.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Transport address the peer answered from during the handshake.
    pub addr: SocketAddr,
    pub state: PeerState,
    /// Last inbound frame attributable to this peer.
    pub last_seen: Timestamp,
    /// Last state change or accounting event.
    pub last_updated: Timestamp,
    /// Last outbound keepalive.
    pub last_ping: Timestamp,
    /// Inbound negative acknowledgements attributed to this peer.
    pub count_of_errors: u8,
    /// Outbound frames whose confirmation deadline elapsed.
    pub count_of_lost: u8,
}

impl Peer {
    /// A freshly handshaken peer: connected, with all stamps at `now`.
    pub fn new(addr: SocketAddr, now: Timestamp) -> Self {
        Self {
            addr,
            state: PeerState::Connected,
            last_seen: now,
            last_updated: now,
            last_ping: now,
            count_of_errors: 0,
            count_of_lost: 0,
        }
    }

    /// A validated inbound frame arrived: refresh every liveness stamp,
    /// clear the counters, and revive a lost peer.
    pub fn record_activity(&mut self, now: Timestamp) {
        self.last_seen = now;
        self.last_updated = now;
        self.last_ping = now;
        self.count_of_lost = 0;
        self.count_of_errors = 0;
        if self.state == PeerState::Lost {
            self.state = PeerState::Connected;
        }
    }

    /// The peer NACKed one of our frames.
    pub fn record_error(&mut self, now: Timestamp) {
        self.last_seen = now;
        self.last_updated = now;
        self.count_of_errors = self.count_of_errors.saturating_add(1);
    }

    /// One of our frames to this peer went unconfirmed past its deadline.
    pub fn record_loss(&mut self, now: Timestamp) {
        self.last_updated = now;
        self.count_of_lost = self.count_of_lost.saturating_add(1);
    }
}

/// Registry of known peers, keyed by device id. Owned exclusively by
/// the tunnel.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<DeviceId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.peers.contains_key(&device)
    }

    pub fn get(&self, device: DeviceId) -> Option<&Peer> {
        self.peers.get(&device)
    }

    pub fn get_mut(&mut self, device: DeviceId) -> Option<&mut Peer> {
        self.peers.get_mut(&device)
    }

    pub fn insert(&mut self, device: DeviceId, peer: Peer) {
        self.peers.insert(device, peer);
    }

    pub fn remove(&mut self, device: DeviceId) -> Option<Peer> {
        self.peers.remove(&device)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &Peer)> {
        self.peers.iter().map(|(&id, peer)| (id, peer))
    }

    /// Snapshot of the known device ids, for walks that also need to
    /// transmit while visiting.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.peers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// True iff the device is known and currently connected.
    pub fn is_connected(&self, device: DeviceId) -> bool {
        matches!(self.peers.get(&device), Some(p) if p.state == PeerState::Connected)
    }

    /// True iff the device is in the table, in any state.
    pub fn is_known(&self, device: DeviceId) -> bool {
        self.contains(device)
    }

    /// True iff the device is known but has gone quiet.
    pub fn is_lost(&self, device: DeviceId) -> bool {
        matches!(self.peers.get(&device), Some(p) if p.state == PeerState::Lost)
    }
}
