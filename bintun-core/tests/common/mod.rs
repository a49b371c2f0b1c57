//! Shared test harness: a scripted in-memory wire, a manually driven
//! clock, deterministic seeds, and event recorders.

#![allow(dead_code)]

use bintun_core::{
    Clock, DeviceId, ErrorCode, SeedSource, Timestamp, Tunnel, TunnelConfig, Wire,
};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory datagram wire. Clones share the same queues, so tests
/// keep one handle while the tunnel owns another.
#[derive(Clone, Default)]
pub struct MockWire {
    inner: Arc<Mutex<WireInner>>,
}

#[derive(Default)]
struct WireInner {
    inbox: VecDeque<(Vec<u8>, SocketAddr)>,
    sent: Vec<(Vec<u8>, SocketAddr)>,
}

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a datagram for the tunnel's next poll.
    pub fn push_inbound(&self, datagram: &[u8], from: SocketAddr) {
        self.inner
            .lock()
            .unwrap()
            .inbox
            .push_back((datagram.to_vec(), from));
    }

    /// Drain everything the tunnel has written so far.
    pub fn take_sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut self.inner.lock().unwrap().sent)
    }

    pub fn has_inbound(&self) -> bool {
        !self.inner.lock().unwrap().inbox.is_empty()
    }
}

impl Wire for MockWire {
    fn send_to(&mut self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .push((datagram.to_vec(), target));
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some((datagram, from)) = self.inner.lock().unwrap().inbox.pop_front() else {
            return Ok(None);
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(Some((n, from)))
    }
}

/// Clock the test advances by hand.
#[derive(Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.ticks.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.ticks.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.ticks.load(Ordering::SeqCst)
    }
}

/// Deterministic seed source: scripted values first, then a counter.
pub struct ScriptedSeeds {
    queue: VecDeque<u8>,
    fallback: u8,
}

impl ScriptedSeeds {
    pub fn new(seeds: &[u8]) -> Self {
        Self {
            queue: seeds.iter().copied().collect(),
            fallback: 0,
        }
    }
}

impl SeedSource for ScriptedSeeds {
    fn next_byte(&mut self) -> u8 {
        self.queue.pop_front().unwrap_or_else(|| {
            self.fallback = self.fallback.wrapping_add(1);
            self.fallback
        })
    }
}

/// Recorded callback invocations, shared between test and tunnel.
#[derive(Clone, Default)]
pub struct Events {
    connected: Arc<Mutex<Vec<DeviceId>>>,
    disconnected: Arc<Mutex<Vec<DeviceId>>>,
    messages: Arc<Mutex<Vec<(DeviceId, Vec<u8>)>>>,
    errors: Arc<Mutex<Vec<(DeviceId, ErrorCode)>>>,
}

impl Events {
    pub fn attach(&self, tunnel: &mut Tunnel<MockWire>) {
        let connected = self.connected.clone();
        tunnel.on_device_connected(move |device, _info| connected.lock().unwrap().push(device));
        let disconnected = self.disconnected.clone();
        tunnel.on_device_disconnected(move |device| disconnected.lock().unwrap().push(device));
        let messages = self.messages.clone();
        tunnel.on_message_received(move |device, payload| {
            messages.lock().unwrap().push((device, payload.to_vec()))
        });
        let errors = self.errors.clone();
        tunnel.on_error(move |device, code, _message| errors.lock().unwrap().push((device, code)));
    }

    pub fn connected(&self) -> Vec<DeviceId> {
        self.connected.lock().unwrap().clone()
    }

    pub fn disconnected(&self) -> Vec<DeviceId> {
        self.disconnected.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<(DeviceId, Vec<u8>)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(DeviceId, ErrorCode)> {
        self.errors.lock().unwrap().clone()
    }
}

/// One tunnel endpoint with its shared wire, clock and recorders.
pub struct Node {
    pub tunnel: Tunnel<MockWire>,
    pub wire: MockWire,
    pub clock: ManualClock,
    pub events: Events,
    pub addr: SocketAddr,
}

impl Node {
    pub fn new(id: DeviceId, addr: &str, config: TunnelConfig) -> Self {
        Self::with_seeds(id, addr, config, &[])
    }

    pub fn with_seeds(id: DeviceId, addr: &str, config: TunnelConfig, seeds: &[u8]) -> Self {
        let wire = MockWire::new();
        let clock = ManualClock::new();
        let events = Events::default();
        let mut tunnel = Tunnel::new(id, wire.clone(), config)
            .with_clock(clock.clone())
            .with_seed_source(ScriptedSeeds::new(seeds));
        events.attach(&mut tunnel);
        Self {
            tunnel,
            wire,
            clock,
            events,
            addr: addr.parse().unwrap(),
        }
    }

    /// Poll until the inbox is drained (one datagram per poll).
    pub fn pump(&mut self) {
        while self.wire.has_inbound() {
            self.tunnel.poll().unwrap();
        }
    }

    pub fn poll(&mut self) {
        self.tunnel.poll().unwrap();
    }
}

/// Move everything `src` has written into `dst`'s inbox, stamped with
/// `src`'s address. Returns the number of datagrams moved.
pub fn shuttle(src: &Node, dst: &Node) -> usize {
    let frames = src.wire.take_sent();
    let moved = frames.len();
    for (datagram, _target) in frames {
        dst.wire.push_inbound(&datagram, src.addr);
    }
    moved
}

/// Run the full 3-step handshake from `a` (initiator) to `b`.
pub fn establish(a: &mut Node, b: &mut Node) {
    a.tunnel.connect_addr(b.addr).unwrap();
    shuttle(a, b);
    b.pump();
    shuttle(b, a);
    a.pump();
    shuttle(a, b);
    b.pump();
}
