//! # bintun — connection-oriented binary messaging over UDP
//!
//! A lightweight tunnel protocol for one-byte-addressed nodes on an
//! unreliable datagram transport: two-way-challenge handshakes,
//! keepalive pings with liveness tracking, per-message acknowledgement
//! with loss accounting, and checksummed frames of up to 255 payload
//! bytes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use bintun_tokio::{TunnelConfig, TunnelEvent, UdpTunnel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TunnelConfig::default();
//!     let (tunnel, mut events) = UdpTunnel::bind("0.0.0.0:4000".parse()?, 7, config).await?;
//!
//!     tunnel.connect("192.168.1.20:4000".parse()?).await?;
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             TunnelEvent::Connected { device, .. } => {
//!                 tunnel.send(device, &b"hello"[..]).await?;
//!             }
//!             TunnelEvent::Message { device, payload } => {
//!                 println!("{device}: {payload:?}");
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   UdpTunnel         │  command handle + event stream
//! ├─────────────────────┤
//! │   Driver task       │  select: datagrams / tick / commands
//! ├─────────────────────┤
//! │   bintun-core       │  poll-driven engine (sans-io)
//! ├─────────────────────┤
//! │   Transport         │  UDP socket, any datagram medium
//! └─────────────────────┘
//! ```
//!
//! The engine itself lives in `bintun-core` and is pure and
//! synchronous; this crate drives it with tokio. Hosts that want full
//! control of scheduling can depend on the core crate alone and call
//! [`Tunnel::poll`] from their own loop.

pub mod error;
pub mod transport;
#[cfg(feature = "tokio")]
pub mod tunnel;

pub use error::{Error, Result};
pub use transport::Transport;
#[cfg(feature = "tokio")]
pub use transport::UdpTransport;
#[cfg(feature = "tokio")]
pub use tunnel::{RandSeed, TunnelEvent, UdpTunnel};

// Core engine re-exports.
pub use bintun_core::{
    constants, DeviceId, DeviceInfo, ErrorCode, Frame, MessageId, PeerState, StartByte, Tunnel,
    TunnelConfig, TunnelError, TunnelStats, ValidationStatus, Wire,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version advertised in handshakes.
pub const PROTOCOL_VERSION: u8 = constants::PROTOCOL_VERSION;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert_eq!(PROTOCOL_VERSION, 1);
    }
}
