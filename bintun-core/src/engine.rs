//! The tunnel engine: a single-threaded, poll-driven state machine that
//! frames application messages, runs the two-way-challenge handshake,
//! keeps peers alive with pings, accounts for unconfirmed frames, and
//! surfaces lifecycle events through registered sinks.
//!
//! Progress is made exclusively through [`Tunnel::poll`]; the engine
//! has no threads and no suspension points. Each poll reads at most one
//! inbound datagram, then performs the periodic sweeps.

use crate::codec::{self, FrameCodec};
use crate::config::TunnelConfig;
use crate::error::{ErrorCode, Result, TunnelError};
use crate::io::{Clock, DeviceInfo, EntropySeed, MonotonicClock, SeedSource, Wire};
use crate::peer::{Peer, PeerState, PeerTable};
use crate::pending::{PendingAcks, PendingHandshakes};
use crate::protocol::{
    self, constants, DeviceId, Frame, MessageId, StartByte, Timestamp, ValidationStatus,
};
use bytes::BytesMut;
use std::net::SocketAddr;
use tracing::{debug, info, trace, warn};

type ConnectedFn = Box<dyn FnMut(DeviceId, &DeviceInfo) + Send>;
type DisconnectedFn = Box<dyn FnMut(DeviceId) + Send>;
type MessageFn = Box<dyn FnMut(DeviceId, &[u8]) + Send>;
type ErrorFn = Box<dyn FnMut(DeviceId, ErrorCode, &str) + Send>;

/// The four registered event sinks. Payload and device-info arguments
/// are borrowed views valid only for the duration of the call.
#[derive(Default)]
struct EventSinks {
    connected: Option<ConnectedFn>,
    disconnected: Option<DisconnectedFn>,
    message: Option<MessageFn>,
    error: Option<ErrorFn>,
}

impl EventSinks {
    fn device_connected(&mut self, device: DeviceId, info: &DeviceInfo) {
        if let Some(sink) = &mut self.connected {
            sink(device, info);
        }
    }

    fn device_disconnected(&mut self, device: DeviceId) {
        if let Some(sink) = &mut self.disconnected {
            sink(device);
        }
    }

    fn message_received(&mut self, device: DeviceId, payload: &[u8]) {
        if let Some(sink) = &mut self.message {
            sink(device, payload);
        }
    }

    fn error(&mut self, device: DeviceId, code: ErrorCode, message: &str) {
        if let Some(sink) = &mut self.error {
            sink(device, code, message);
        }
    }
}

/// Running counters for one tunnel.
#[derive(Debug, Default, Clone)]
pub struct TunnelStats {
    /// Frames written to the wire, of any kind.
    pub frames_sent: u64,
    /// Datagrams read off the wire, valid or not.
    pub frames_received: u64,
    /// Datagrams that failed parsing or validation.
    pub invalid_frames: u64,
    /// Pending-ack entries that expired unconfirmed.
    pub packets_lost: u64,
    /// Keepalive pings written.
    pub pings_sent: u64,
    /// Handshakes that reached the connected state, either role.
    pub handshakes_completed: u64,
}

/// A connection-oriented tunnel over an unreliable datagram wire.
///
/// The tunnel exclusively owns its peer table, both pending tables and
/// the message counter. It is not re-entrant: `send`, `connect`,
/// `disconnect` and `poll` must not race each other.
pub struct Tunnel<W: Wire> {
    id: DeviceId,
    config: TunnelConfig,
    wire: W,
    clock: Box<dyn Clock + Send>,
    seeds: Box<dyn SeedSource + Send>,
    codec: FrameCodec,
    peers: PeerTable,
    pending_acks: PendingAcks,
    pending_handshakes: PendingHandshakes,
    message_counter: MessageId,
    stats: TunnelStats,
    events: EventSinks,
}

impl<W: Wire> Tunnel<W> {
    /// Create a tunnel with the given one-byte identity. The identity
    /// must be non-zero; zero is the wire encoding of "absent".
    pub fn new(id: DeviceId, wire: W, config: TunnelConfig) -> Self {
        debug_assert!(id != 0, "device id 0 is reserved");
        Self {
            id,
            config,
            wire,
            clock: Box::new(MonotonicClock::default()),
            seeds: Box::new(EntropySeed),
            codec: FrameCodec::new(),
            peers: PeerTable::new(),
            pending_acks: PendingAcks::new(),
            pending_handshakes: PendingHandshakes::new(),
            message_counter: 0,
            stats: TunnelStats::default(),
            events: EventSinks::default(),
        }
    }

    /// Replace the clock, e.g. with a scripted one in tests.
    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the seed source.
    pub fn with_seed_source(mut self, seeds: impl SeedSource + Send + 'static) -> Self {
        self.seeds = Box::new(seeds);
        self
    }

    /// This tunnel's device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn stats(&self) -> &TunnelStats {
        &self.stats
    }

    /// The peer record for a known device, if any.
    pub fn peer(&self, device: DeviceId) -> Option<&Peer> {
        self.peers.get(device)
    }

    pub fn is_connected(&self, device: DeviceId) -> bool {
        self.peers.is_connected(device)
    }

    pub fn is_known(&self, device: DeviceId) -> bool {
        self.peers.is_known(device)
    }

    pub fn is_lost(&self, device: DeviceId) -> bool {
        self.peers.is_lost(device)
    }

    /// Direct access to the wire, for hosts that feed it externally.
    pub fn wire_mut(&mut self) -> &mut W {
        &mut self.wire
    }

    /// Register the sink called when a handshake completes.
    pub fn on_device_connected(
        &mut self,
        sink: impl FnMut(DeviceId, &DeviceInfo) + Send + 'static,
    ) {
        self.events.connected = Some(Box::new(sink));
    }

    /// Register the sink called when a peer leaves the table.
    pub fn on_device_disconnected(&mut self, sink: impl FnMut(DeviceId) + Send + 'static) {
        self.events.disconnected = Some(Box::new(sink));
    }

    /// Register the sink called for each application message. The
    /// payload borrows the receive buffer and is valid only for the
    /// duration of the call.
    pub fn on_message_received(&mut self, sink: impl FnMut(DeviceId, &[u8]) + Send + 'static) {
        self.events.message = Some(Box::new(sink));
    }

    /// Register the sink called for operational errors.
    pub fn on_error(&mut self, sink: impl FnMut(DeviceId, ErrorCode, &str) + Send + 'static) {
        self.events.error = Some(Box::new(sink));
    }

    /// Send an application payload to a connected peer. The frame is
    /// registered for confirmation; expiry is accounted against the
    /// peer during later polls.
    pub fn send(&mut self, to: DeviceId, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(TunnelError::EmptyPayload);
        }
        if payload.len() > usize::from(u8::MAX) {
            return Err(TunnelError::PayloadTooLarge {
                size: payload.len(),
            });
        }
        let Some(addr) = self
            .peers
            .get(to)
            .filter(|p| p.state == PeerState::Connected)
            .map(|p| p.addr)
        else {
            self.events
                .error(to, ErrorCode::DeviceNotConnected, "device not connected");
            return Err(TunnelError::NotConnected { device: to });
        };

        let message_id = self.transmit(addr, StartByte::DataV1, Some(payload))?;
        let now = self.clock.now();
        self.pending_acks.insert(message_id, to, now);
        trace!(device = to, message = message_id, size = payload.len(), "data frame sent");
        Ok(())
    }

    /// Start a handshake with the device described by `info`.
    pub fn connect(&mut self, info: &DeviceInfo) -> Result<()> {
        match info {
            DeviceInfo::Udp { addr } => self.connect_addr(*addr),
        }
    }

    /// Start a handshake with a UDP endpoint.
    pub fn connect_addr(&mut self, addr: SocketAddr) -> Result<()> {
        let seed = self.generate_seed();
        let now = self.clock.now();
        self.pending_handshakes.insert(seed, addr, now);
        debug!(%addr, seed, "handshake started");
        self.send_handshake(addr, StartByte::HandshakeInit, seed)?;
        Ok(())
    }

    /// Tear down a peer: emit `DISCONNECT` and drop the record. A
    /// silent no-op for unknown devices.
    pub fn disconnect(&mut self, device: DeviceId) -> Result<()> {
        let Some(peer) = self.peers.remove(device) else {
            return Ok(());
        };
        debug!(device, "disconnecting peer");
        self.transmit(peer.addr, StartByte::Disconnect, None)?;
        Ok(())
    }

    /// Make progress: read at most one inbound datagram and dispatch
    /// it, expire unconfirmed frames, walk the peer table for pings and
    /// timeouts, and drop stale handshakes. Hosts call this repeatedly.
    pub fn poll(&mut self) -> Result<()> {
        let mut codec = std::mem::take(&mut self.codec);
        let inbound = self.read_inbound(&mut codec);
        self.codec = codec;
        inbound?;

        let now = self.clock.now();
        self.sweep_pending_acks(now);
        self.update_peers(now)?;
        self.pending_handshakes.sweep(now, self.config.stale_timeout);
        Ok(())
    }

    fn read_inbound(&mut self, codec: &mut FrameCodec) -> Result<()> {
        let Some((frame, status, from)) = codec.read(&mut self.wire)? else {
            return Ok(());
        };
        self.stats.frames_received += 1;
        if status.is_ok() {
            self.dispatch(&frame, from)
        } else {
            self.stats.invalid_frames += 1;
            self.reject(&frame, status, from)
        }
    }

    /// Answer an invalid frame: best-effort resolve any pending ack it
    /// names, then NACK the structural and checksum failures. Other
    /// failure kinds stay silent.
    fn reject(&mut self, frame: &Frame<'_>, status: ValidationStatus, from: SocketAddr) -> Result<()> {
        warn!(%from, status = %status, "invalid frame");
        if frame.message_id != 0 {
            self.pending_acks.resolve(frame.message_id);
        }
        match status {
            ValidationStatus::MissedStartByte
            | ValidationStatus::MissedDeviceId
            | ValidationStatus::IncorrectFormat => {
                self.transmit(from, StartByte::IncorrectFormat, None)?;
            }
            ValidationStatus::IncorrectChecksum => {
                self.transmit(from, StartByte::IncorrectChecksum, None)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: &Frame<'_>, from: SocketAddr) -> Result<()> {
        let sender = frame.device_id;
        let byte = frame.start.as_byte();

        // Stranger rule: data and control frames from devices we do not
        // know get exactly one DISCONNECT and are otherwise dropped.
        // Handshake bytes and DISCONNECT itself fall outside both
        // ranges and pass through.
        if (protocol::is_version_start_byte(byte) || protocol::is_control_start_byte(byte))
            && !self.peers.is_known(sender)
        {
            debug!(device = sender, %from, "frame from unknown device");
            self.transmit(from, StartByte::Disconnect, None)?;
            return Ok(());
        }

        match frame.start {
            StartByte::DataV1 => {
                let message_id = self.transmit(from, StartByte::Confirm, None)?;
                let now = self.clock.now();
                self.pending_acks.insert(message_id, sender, now);
                self.touch_peer(sender);
                let payload = frame.payload.unwrap_or(&[]);
                trace!(device = sender, size = payload.len(), "message received");
                self.events.message_received(sender, payload);
            }
            StartByte::Confirm => {
                self.pending_acks.resolve(frame.message_id);
                self.touch_peer(sender);
            }
            StartByte::IncorrectFormat | StartByte::IncorrectChecksum | StartByte::Rejected => {
                self.pending_acks.resolve(frame.message_id);
                let now = self.clock.now();
                if let Some(peer) = self.peers.get_mut(sender) {
                    peer.record_error(now);
                }
                debug!(device = sender, start = %frame.start, "negative acknowledgement");
                self.events
                    .error(sender, ErrorCode::IncorrectFormat, "incorrect format");
            }
            StartByte::Ping => {
                let message_id = self.transmit(from, StartByte::Confirm, None)?;
                let now = self.clock.now();
                self.pending_acks.insert(message_id, sender, now);
                self.touch_peer(sender);
            }
            StartByte::HandshakeInit => self.on_handshake_init(frame, from)?,
            StartByte::HandshakeResp => self.on_handshake_resp(frame, from)?,
            StartByte::HandshakeComplete => self.on_handshake_complete(frame, from)?,
            StartByte::Disconnect => {
                if let Some(mut peer) = self.peers.remove(sender) {
                    peer.state = PeerState::Disconnected;
                    info!(device = sender, "peer disconnected");
                    self.events.device_disconnected(sender);
                }
            }
            StartByte::Undefined => {}
        }
        Ok(())
    }

    /// Common handshake frame checks. Returns the recovered seed, or
    /// `None` after a `REJECTED` reply has been sent.
    fn check_handshake(
        &mut self,
        frame: &Frame<'_>,
        from: SocketAddr,
        check_version: bool,
    ) -> Result<Option<u8>> {
        let Some((version, encoded)) = protocol::parse_handshake_payload(frame.payload.unwrap_or(&[]))
        else {
            // Validation guarantees three bytes; treat anything else as
            // a malformed peer.
            self.transmit(from, StartByte::Rejected, None)?;
            return Ok(None);
        };
        if check_version && version != self.config.protocol_version {
            warn!(device = frame.device_id, version, "unsupported protocol version");
            self.transmit(from, StartByte::Rejected, None)?;
            return Ok(None);
        }
        let seed = protocol::decode_seed(frame.device_id, encoded);
        if !protocol::verify_seed(frame.device_id, seed, encoded) {
            warn!(device = frame.device_id, seed, "handshake verification failed");
            self.transmit(from, StartByte::Rejected, None)?;
            return Ok(None);
        }
        Ok(Some(seed))
    }

    /// Responder, step 1: remember the initiator under its seed and
    /// answer with `HANDSHAKE_RESP`.
    fn on_handshake_init(&mut self, frame: &Frame<'_>, from: SocketAddr) -> Result<()> {
        let Some(seed) = self.check_handshake(frame, from, true)? else {
            return Ok(());
        };
        let now = self.clock.now();
        self.pending_handshakes.insert(seed, from, now);
        debug!(device = frame.device_id, seed, "handshake init accepted");
        self.send_handshake(from, StartByte::HandshakeResp, seed)?;
        Ok(())
    }

    /// Initiator, step 2 (terminal for this role): the responder
    /// answered our seed, so the peer becomes connected here, exactly
    /// once, and we close the exchange with `HANDSHAKE_COMPLETE`.
    fn on_handshake_resp(&mut self, frame: &Frame<'_>, from: SocketAddr) -> Result<()> {
        let Some(seed) = self.check_handshake(frame, from, true)? else {
            return Ok(());
        };
        let Some(entry) = self.pending_handshakes.take(seed) else {
            warn!(device = frame.device_id, seed, "handshake response with unknown seed");
            self.transmit(from, StartByte::Rejected, None)?;
            return Ok(());
        };
        self.complete_handshake(frame.device_id, entry.addr);
        self.send_handshake(entry.addr, StartByte::HandshakeComplete, seed)?;
        Ok(())
    }

    /// Responder, step 3 (terminal for this role).
    fn on_handshake_complete(&mut self, frame: &Frame<'_>, from: SocketAddr) -> Result<()> {
        let Some(seed) = self.check_handshake(frame, from, false)? else {
            return Ok(());
        };
        let Some(entry) = self.pending_handshakes.take(seed) else {
            warn!(device = frame.device_id, seed, "handshake completion with unknown seed");
            self.transmit(from, StartByte::Rejected, None)?;
            return Ok(());
        };
        self.complete_handshake(frame.device_id, entry.addr);
        Ok(())
    }

    fn complete_handshake(&mut self, device: DeviceId, addr: SocketAddr) {
        let now = self.clock.now();
        self.peers.insert(device, Peer::new(addr, now));
        self.stats.handshakes_completed += 1;
        info!(device, %addr, "peer connected");
        let info = DeviceInfo::udp(addr);
        self.events.device_connected(device, &info);
    }

    /// Expire unconfirmed frames and charge each one to its peer.
    fn sweep_pending_acks(&mut self, now: Timestamp) {
        for device in self
            .pending_acks
            .sweep(now, self.config.lost_packet_timeout)
        {
            self.stats.packets_lost += 1;
            if let Some(peer) = self.peers.get_mut(device) {
                peer.record_loss(now);
                trace!(device, lost = peer.count_of_lost, "frame unconfirmed past deadline");
            }
        }
    }

    /// Ping peers on schedule and apply the liveness state machine:
    /// `Connected -> Lost` on silence or excessive loss, `Lost ->
    /// removed` after the disconnect timeout.
    fn update_peers(&mut self, now: Timestamp) -> Result<()> {
        for device in self.peers.device_ids() {
            let ping_target = self.peers.get(device).and_then(|peer| {
                (now.saturating_sub(peer.last_ping) >= self.config.ping_frequency)
                    .then_some(peer.addr)
            });
            if let Some(addr) = ping_target {
                let message_id = self.transmit(addr, StartByte::Ping, None)?;
                self.pending_acks.insert(message_id, device, now);
                self.stats.pings_sent += 1;
                if let Some(peer) = self.peers.get_mut(device) {
                    peer.last_ping = now;
                }
                trace!(device, "ping sent");
            }

            let threshold = self.config.disconnect_on_lost_packets;
            let mut went_lost = false;
            let mut removal: Option<SocketAddr> = None;
            if let Some(peer) = self.peers.get_mut(device) {
                if threshold > 0
                    && peer.count_of_lost > threshold
                    && peer.state == PeerState::Connected
                {
                    peer.state = PeerState::Lost;
                    peer.last_updated = now;
                    went_lost = true;
                } else if peer.state == PeerState::Connected
                    && now.saturating_sub(peer.last_seen) > self.config.stale_timeout
                {
                    peer.state = PeerState::Lost;
                    peer.last_updated = now;
                    went_lost = true;
                } else if peer.state == PeerState::Lost
                    && now.saturating_sub(peer.last_seen) > self.config.disconnected_timeout
                {
                    removal = Some(peer.addr);
                }
            }

            if went_lost {
                warn!(device, "peer lost");
                self.events.error(device, ErrorCode::DeviceLost, "device lost");
            }
            if let Some(addr) = removal {
                self.peers.remove(device);
                info!(device, "peer removed after silence");
                self.transmit(addr, StartByte::Disconnect, None)?;
                self.events.device_disconnected(device);
            }
        }
        Ok(())
    }

    /// Record activity for a known sender.
    fn touch_peer(&mut self, device: DeviceId) {
        let now = self.clock.now();
        if let Some(peer) = self.peers.get_mut(device) {
            peer.record_activity(now);
        }
    }

    /// Write one frame to the wire under a fresh message id.
    fn transmit(
        &mut self,
        target: SocketAddr,
        start: StartByte,
        payload: Option<&[u8]>,
    ) -> Result<MessageId> {
        let message_id = self.next_message_id();
        let frame = Frame {
            start,
            device_id: self.id,
            message_id,
            payload,
        };
        let mut buf = BytesMut::with_capacity(constants::MAX_FRAME);
        codec::encode(&frame, &mut buf);
        self.wire.send_to(&buf, target)?;
        self.stats.frames_sent += 1;
        trace!(%target, start = %start, message = message_id, "frame written");
        Ok(message_id)
    }

    fn send_handshake(
        &mut self,
        target: SocketAddr,
        start: StartByte,
        seed: u8,
    ) -> Result<MessageId> {
        let payload = protocol::handshake_payload(self.config.protocol_version, self.id, seed);
        self.transmit(target, start, Some(&payload))
    }

    /// Rolling counter 1..=255; zero is the wire encoding of "absent".
    fn next_message_id(&mut self) -> MessageId {
        self.message_counter = if self.message_counter == u8::MAX {
            1
        } else {
            self.message_counter + 1
        };
        self.message_counter
    }

    /// Draw a seed that does not collide with an in-flight handshake.
    fn generate_seed(&mut self) -> u8 {
        let mut seed = self.seeds.next_byte();
        while self.pending_handshakes.contains(seed) {
            seed = self.seeds.next_byte();
        }
        seed
    }
}
