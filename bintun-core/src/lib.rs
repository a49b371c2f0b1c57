//! Pure synchronous engine for the bintun datagram tunnel protocol.
//!
//! This crate implements the framing, validation and connection state
//! machine of the protocol with zero runtime dependencies — no tokio,
//! no async, no sockets. It only depends on `bytes` and `tracing`.
//! The wire, the clock and the seed randomness are injected through
//! traits so hosts and tests choose how the engine is driven.
//!
//! ```text
//! ┌────────────────────────────────┐
//! │  bintun-core                   │
//! │                                │
//! │  protocol  ← wire vocabulary   │
//! │  codec     ← frame I/O         │
//! │  peer      ← liveness table    │
//! │  pending   ← ack / handshake   │
//! │  engine    ← state machine     │
//! │  config    ← tuning            │
//! │  io        ← injected traits   │
//! └────────────────────────────────┘
//! ```
//!
//! Progress is made exclusively by calling [`Tunnel::poll`] from the
//! host loop; one inbound datagram is processed per call, then the
//! periodic sweeps run.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod peer;
pub mod pending;
pub mod protocol;

pub use config::TunnelConfig;
pub use engine::{Tunnel, TunnelStats};
pub use error::{ErrorCode, Result, TunnelError};
pub use io::{Clock, DeviceInfo, EntropySeed, MonotonicClock, SeedSource, Wire};
pub use peer::{Peer, PeerState, PeerTable};
pub use pending::{PendingAcks, PendingHandshakes};
pub use protocol::{
    checksum, constants, decode_seed, encode_seed, handshake_payload, is_control_start_byte,
    is_handshake_start_byte, is_supported_start_byte, is_version_start_byte,
    parse_handshake_payload, verify_seed, DeviceId, Frame, MessageId, StartByte, Timestamp,
    ValidationStatus,
};
