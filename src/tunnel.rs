//! Actor-style tunnel driver — owns the core engine in a dedicated
//! task, bridges datagrams through an async [`Transport`], and
//! surfaces engine callbacks as a [`TunnelEvent`] stream. Zero locks:
//! the engine is touched by the driver task alone, which preserves the
//! single-writer contract on the peer table.

use crate::error::{Error, Result};
use crate::transport::Transport;
use bintun_core::{
    constants, DeviceId, DeviceInfo, ErrorCode, SeedSource, Tunnel, TunnelConfig, TunnelStats,
    Wire,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Events surfaced to the host, mirroring the engine's callback sinks.
/// Message payloads are copied out of the engine's receive buffer
/// before they cross the channel.
#[derive(Debug, Clone)]
pub enum TunnelEvent {
    /// A handshake completed; the peer is connected.
    Connected { device: DeviceId, info: DeviceInfo },
    /// The peer left the table, by request or by timeout.
    Disconnected { device: DeviceId },
    /// An application payload arrived.
    Message { device: DeviceId, payload: Bytes },
    /// An operational error was attributed to the peer.
    Error {
        device: DeviceId,
        code: ErrorCode,
        message: String,
    },
}

/// Production seed source backed by the `rand` thread RNG.
#[derive(Debug, Default, Clone)]
pub struct RandSeed;

impl SeedSource for RandSeed {
    fn next_byte(&mut self) -> u8 {
        rand::random()
    }
}

/// Commands sent to the driver task.
enum TunnelCmd {
    Send {
        to: DeviceId,
        payload: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Connect {
        peer: SocketAddr,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        device: DeviceId,
        reply: oneshot::Sender<Result<()>>,
    },
    IsConnected {
        device: DeviceId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<TunnelStats>,
    },
    Close,
}

/// Queue-backed [`Wire`]: the driver pushes received datagrams into
/// the inbox and forwards the engine's outbox to the transport.
#[derive(Default)]
struct QueueWire {
    inbox: VecDeque<(Bytes, SocketAddr)>,
    outbox: Vec<(Bytes, SocketAddr)>,
}

impl QueueWire {
    fn push_inbound(&mut self, datagram: &[u8], from: SocketAddr) {
        self.inbox.push_back((Bytes::copy_from_slice(datagram), from));
    }

    fn has_inbound(&self) -> bool {
        !self.inbox.is_empty()
    }

    fn drain_outbound(&mut self) -> Vec<(Bytes, SocketAddr)> {
        std::mem::take(&mut self.outbox)
    }
}

impl Wire for QueueWire {
    fn send_to(&mut self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        self.outbox.push((Bytes::copy_from_slice(datagram), target));
        Ok(())
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some((datagram, from)) = self.inbox.pop_front() else {
            return Ok(None);
        };
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(Some((n, from)))
    }
}

/// Handle to a tunnel running over UDP in a background task.
///
/// Created with [`UdpTunnel::bind`]; commands travel over a channel to
/// the driver task and events come back through the receiver returned
/// alongside the handle. Dropping the handle stops the driver.
pub struct UdpTunnel {
    cmd_tx: mpsc::Sender<TunnelCmd>,
    local_addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl UdpTunnel {
    /// Bind a UDP socket and start the driver task.
    pub async fn bind(
        addr: SocketAddr,
        device_id: DeviceId,
        config: TunnelConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TunnelEvent>)> {
        let transport = crate::transport::UdpTransport::bind(addr).await?;
        Self::with_transport(transport, device_id, config)
    }

    /// Start the driver task over an existing transport.
    pub fn with_transport<T: Transport>(
        transport: T,
        device_id: DeviceId,
        config: TunnelConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TunnelEvent>)> {
        config.validate()?;
        let local_addr = transport.local_addr()?;

        let mut tunnel = Tunnel::new(device_id, QueueWire::default(), config.clone())
            .with_seed_source(RandSeed);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        register_event_sinks(&mut tunnel, event_tx);

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let tick_every = poll_interval(&config);
        let task = tokio::spawn(run_tunnel_actor(
            tunnel,
            Arc::new(transport),
            cmd_rx,
            tick_every,
        ));

        info!(device = device_id, %local_addr, "tunnel started");
        Ok((
            Self {
                cmd_tx,
                local_addr,
                task,
            },
            event_rx,
        ))
    }

    /// The address the underlying transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send an application payload to a connected device.
    pub async fn send(&self, to: DeviceId, payload: impl Into<Bytes>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(TunnelCmd::Send {
                to,
                payload: payload.into(),
                reply,
            })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Start a handshake with a remote endpoint. The outcome arrives
    /// as a [`TunnelEvent::Connected`] or stays silent on timeout.
    pub async fn connect(&self, peer: SocketAddr) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(TunnelCmd::Connect { peer, reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Tear down a peer.
    pub async fn disconnect(&self, device: DeviceId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(TunnelCmd::Disconnect { device, reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Whether the device is currently connected. Returns `false` when
    /// the driver has stopped.
    pub async fn is_connected(&self, device: DeviceId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(TunnelCmd::IsConnected { device, reply })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Snapshot of the engine counters.
    pub async fn stats(&self) -> Result<TunnelStats> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(TunnelCmd::Stats { reply })
            .await
            .map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Ask the driver to stop after flushing pending output.
    pub fn close(&self) {
        let _ = self.cmd_tx.try_send(TunnelCmd::Close);
    }
}

impl Drop for UdpTunnel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn register_event_sinks(
    tunnel: &mut Tunnel<QueueWire>,
    event_tx: mpsc::UnboundedSender<TunnelEvent>,
) {
    let tx = event_tx.clone();
    tunnel.on_device_connected(move |device, info| {
        let _ = tx.send(TunnelEvent::Connected {
            device,
            info: info.clone(),
        });
    });
    let tx = event_tx.clone();
    tunnel.on_device_disconnected(move |device| {
        let _ = tx.send(TunnelEvent::Disconnected { device });
    });
    let tx = event_tx.clone();
    tunnel.on_message_received(move |device, payload| {
        let _ = tx.send(TunnelEvent::Message {
            device,
            payload: Bytes::copy_from_slice(payload),
        });
    });
    tunnel.on_error(move |device, code, message| {
        let _ = event_tx.send(TunnelEvent::Error {
            device,
            code,
            message: message.to_string(),
        });
    });
}

/// Tick fast enough to honor the tightest configured deadline without
/// spinning.
fn poll_interval(config: &TunnelConfig) -> Duration {
    let tightest = config.ping_frequency.min(config.lost_packet_timeout);
    Duration::from_millis((tightest / 4).clamp(10, 500))
}

/// Driver loop: inbound datagrams, the poll tick and host commands all
/// funnel into the engine; every arm ends by flushing its output.
async fn run_tunnel_actor<T: Transport>(
    mut tunnel: Tunnel<QueueWire>,
    transport: Arc<T>,
    mut cmd_rx: mpsc::Receiver<TunnelCmd>,
    tick_every: Duration,
) {
    let mut tick = tokio::time::interval(tick_every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = vec![0u8; constants::MAX_FRAME];

    loop {
        tokio::select! {
            received = transport.recv_from(&mut buf) => {
                match received {
                    Ok((n, from)) => {
                        tunnel.wire_mut().push_inbound(&buf[..n], from);
                        while tunnel.wire_mut().has_inbound() {
                            if let Err(e) = tunnel.poll() {
                                warn!(error = %e, "engine poll failed");
                                break;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "transport receive failed"),
                }
                flush(&mut tunnel, &transport).await;
            }

            _ = tick.tick() => {
                if let Err(e) = tunnel.poll() {
                    warn!(error = %e, "engine poll failed");
                }
                flush(&mut tunnel, &transport).await;
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(TunnelCmd::Send { to, payload, reply }) => {
                        let result = tunnel.send(to, &payload).map_err(Error::from);
                        let _ = reply.send(result);
                    }
                    Some(TunnelCmd::Connect { peer, reply }) => {
                        let result = tunnel.connect_addr(peer).map_err(Error::from);
                        let _ = reply.send(result);
                    }
                    Some(TunnelCmd::Disconnect { device, reply }) => {
                        let result = tunnel.disconnect(device).map_err(Error::from);
                        let _ = reply.send(result);
                    }
                    Some(TunnelCmd::IsConnected { device, reply }) => {
                        let _ = reply.send(tunnel.is_connected(device));
                    }
                    Some(TunnelCmd::Stats { reply }) => {
                        let _ = reply.send(tunnel.stats().clone());
                    }
                    Some(TunnelCmd::Close) | None => {
                        flush(&mut tunnel, &transport).await;
                        debug!("tunnel driver stopping");
                        break;
                    }
                }
                flush(&mut tunnel, &transport).await;
            }
        }
    }
}

/// Forward everything the engine queued to the transport.
async fn flush<T: Transport>(tunnel: &mut Tunnel<QueueWire>, transport: &Arc<T>) {
    for (datagram, target) in tunnel.wire_mut().drain_outbound() {
        if let Err(e) = transport.send_to(&datagram, target).await {
            trace!(error = %e, %target, "transport send failed");
        }
    }
}
