//! Wire-format vocabulary: start bytes, validation statuses, frames,
//! the frame checksum, and the handshake seed arithmetic.

use std::fmt;

/// Protocol constants
pub mod constants {
    /// Version byte carried in handshake payloads.
    pub const PROTOCOL_VERSION: u8 = 1;
    /// Maximum payload capacity of the receive buffer.
    pub const PAYLOAD_MAX: usize = 256;
    /// Fixed header (4 bytes) plus trailing checksum (2 bytes).
    pub const FRAME_OVERHEAD: usize = 6;
    /// Header bytes preceding the payload: start, device, message, size.
    pub const HEADER_LEN: usize = 4;
    /// Largest datagram a single frame can occupy.
    pub const MAX_FRAME: usize = PAYLOAD_MAX + FRAME_OVERHEAD;
    /// Handshake payloads are exactly version + 2 encoded seed bytes.
    pub const HANDSHAKE_LEN: usize = 3;
    /// Initial state of the 16-bit frame checksum.
    pub const CHECKSUM_BASIS: u16 = 0x0097;
    /// Multiplier of the 16-bit frame checksum.
    pub const CHECKSUM_PRIME: u16 = 0x00A1;

    /// Unconfirmed frames older than this count as lost (ms).
    pub const LOST_PACKET_TIMEOUT_MS: u64 = 1000;
    /// Outbound keepalive cadence per peer (ms).
    pub const PING_FREQUENCY_MS: u64 = 1000;
    /// Silence after which a connected peer is marked lost, and the
    /// lifetime of an unanswered handshake (ms).
    pub const STALE_TIMEOUT_MS: u64 = 10_000;
    /// Further silence after which a lost peer is dropped (ms).
    pub const DISCONNECTED_TIMEOUT_MS: u64 = 10_000;
    /// Loss threshold for eager disconnection; 0 disables the check.
    pub const DISCONNECT_ON_LOST_PACKETS: u8 = 0;
}

/// One-byte node identity. Zero is reserved as "absent".
pub type DeviceId = u8;

/// Rolling frame counter value. Zero is reserved as "absent".
pub type MessageId = u8;

/// Monotonic milliseconds as reported by the injected clock.
pub type Timestamp = u64;

/// First byte of every frame, identifying its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StartByte {
    /// Parse-only sentinel for unknown bytes; never transmitted.
    Undefined = 0x00,
    /// Application data, wire version 1. Payload required.
    DataV1 = 0x30,
    /// Positive acknowledgement. Empty payload.
    Confirm = 0x41,
    /// Negative acknowledgement: structural error. Empty payload.
    IncorrectFormat = 0x46,
    /// Negative acknowledgement: checksum mismatch. Empty payload.
    IncorrectChecksum = 0x48,
    /// Liveness probe. Empty payload.
    Ping = 0x50,
    /// Policy rejection (bad version, unknown seed). Empty payload.
    Rejected = 0x52,
    /// Handshake step 1, initiator to responder.
    HandshakeInit = 0x2A,
    /// Handshake step 2, responder to initiator.
    HandshakeResp = 0x2B,
    /// Handshake step 3, initiator to responder.
    HandshakeComplete = 0x2E,
    /// Peer teardown. Empty payload.
    Disconnect = 0x7E,
}

impl StartByte {
    /// Classify a raw byte; anything outside the supported set maps to
    /// [`StartByte::Undefined`].
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x30 => StartByte::DataV1,
            0x41 => StartByte::Confirm,
            0x46 => StartByte::IncorrectFormat,
            0x48 => StartByte::IncorrectChecksum,
            0x50 => StartByte::Ping,
            0x52 => StartByte::Rejected,
            0x2A => StartByte::HandshakeInit,
            0x2B => StartByte::HandshakeResp,
            0x2E => StartByte::HandshakeComplete,
            0x7E => StartByte::Disconnect,
            _ => StartByte::Undefined,
        }
    }

    /// Raw wire value.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Name for logging.
    pub fn name(self) -> &'static str {
        match self {
            StartByte::Undefined => "UNDEFINED",
            StartByte::DataV1 => "DATA_V1",
            StartByte::Confirm => "CONFIRM",
            StartByte::IncorrectFormat => "INCORRECT_FORMAT",
            StartByte::IncorrectChecksum => "INCORRECT_CHECKSUM",
            StartByte::Ping => "PING",
            StartByte::Rejected => "REJECTED",
            StartByte::HandshakeInit => "HANDSHAKE_INIT",
            StartByte::HandshakeResp => "HANDSHAKE_RESP",
            StartByte::HandshakeComplete => "HANDSHAKE_COMPLETE",
            StartByte::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for StartByte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// True for bytes reserved for versioned application data (0x30..=0x39).
/// Only 0x30 is currently assigned.
pub fn is_version_start_byte(value: u8) -> bool {
    (0x30..=0x39).contains(&value)
}

/// True for bytes reserved for control signalling (0x41..=0x5A).
pub fn is_control_start_byte(value: u8) -> bool {
    (0x41..=0x5A).contains(&value)
}

/// True for the three handshake bytes.
pub fn is_handshake_start_byte(value: u8) -> bool {
    matches!(value, 0x2A | 0x2B | 0x2E)
}

/// True iff the byte is a member of the transmittable start-byte set.
pub fn is_supported_start_byte(value: u8) -> bool {
    StartByte::from_byte(value) != StartByte::Undefined
}

/// Outcome of parsing and validating a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    /// Frame is structurally sound and the checksum matched.
    Ok,
    /// Start byte is not in the supported set.
    MissedStartByte,
    /// Sender identity byte was zero.
    MissedDeviceId,
    /// Message counter byte was zero.
    MissedMessageId,
    /// Structure was sound but the checksum did not match.
    IncorrectChecksum,
    /// Payload size contradicts the frame kind.
    IncorrectFormat,
    /// Datagram was shorter than the declared frame.
    UnexpectedEndOfStream,
}

impl ValidationStatus {
    pub fn is_ok(self) -> bool {
        self == ValidationStatus::Ok
    }

    /// Name for logging.
    pub fn name(self) -> &'static str {
        match self {
            ValidationStatus::Ok => "OK",
            ValidationStatus::MissedStartByte => "MISSED_START_BYTE",
            ValidationStatus::MissedDeviceId => "MISSED_DEVICE_ID",
            ValidationStatus::MissedMessageId => "MISSED_MESSAGE_ID",
            ValidationStatus::IncorrectChecksum => "INCORRECT_CHECKSUM",
            ValidationStatus::IncorrectFormat => "INCORRECT_FORMAT",
            ValidationStatus::UnexpectedEndOfStream => "UNEXPECTED_END_OF_STREAM",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single in-memory frame. The payload borrows either the caller's
/// buffer (outbound) or the codec's receive buffer (inbound); the
/// trailing checksum exists only on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub start: StartByte,
    pub device_id: DeviceId,
    pub message_id: MessageId,
    pub payload: Option<&'a [u8]>,
}

impl<'a> Frame<'a> {
    /// A payload-less frame of the given kind.
    pub fn control(start: StartByte, device_id: DeviceId, message_id: MessageId) -> Frame<'static> {
        Frame {
            start,
            device_id,
            message_id,
            payload: None,
        }
    }

    /// An application data frame.
    pub fn data(device_id: DeviceId, message_id: MessageId, payload: &'a [u8]) -> Frame<'a> {
        Frame {
            start: StartByte::DataV1,
            device_id,
            message_id,
            payload: Some(payload),
        }
    }

    /// The all-zero frame returned for unreadable datagrams.
    pub fn empty() -> Frame<'static> {
        Frame {
            start: StartByte::Undefined,
            device_id: 0,
            message_id: 0,
            payload: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start == StartByte::Undefined
            && self.device_id == 0
            && self.message_id == 0
            && self.payload.is_none()
    }

    /// Declared payload length as carried in the size byte.
    pub fn size(&self) -> u8 {
        self.payload.map_or(0, |p| p.len() as u8)
    }
}

/// 16-bit FNV-1a-style hash over the payload bytes. The empty input
/// hashes to [`constants::CHECKSUM_BASIS`].
pub fn checksum(bytes: &[u8]) -> u16 {
    let mut hash = constants::CHECKSUM_BASIS;
    for &b in bytes {
        hash = (hash ^ u16::from(b)).wrapping_mul(constants::CHECKSUM_PRIME);
    }
    hash
}

/// Pack a device id and seed into the two handshake bytes:
/// high byte `id XOR seed` (verification material), low byte
/// `id + seed mod 256` (recovery material).
pub fn encode_seed(id: DeviceId, seed: u8) -> u16 {
    (u16::from(id ^ seed) << 8) | u16::from(id.wrapping_add(seed))
}

/// Recover the seed from the low encoded byte, given the *sender's*
/// device id as carried in the frame header.
pub fn decode_seed(id: DeviceId, encoded: u16) -> u8 {
    (encoded as u8).wrapping_sub(id)
}

/// Check the high encoded byte against a recovered seed.
pub fn verify_seed(id: DeviceId, seed: u8, encoded: u16) -> bool {
    (encoded >> 8) as u8 == id ^ seed
}

/// Build the 3-byte handshake payload: version, low, high.
pub fn handshake_payload(version: u8, id: DeviceId, seed: u8) -> [u8; constants::HANDSHAKE_LEN] {
    let encoded = encode_seed(id, seed);
    [version, (encoded & 0xFF) as u8, (encoded >> 8) as u8]
}

/// Split a handshake payload into its version byte and encoded seed.
/// Returns `None` unless the payload is exactly three bytes.
pub fn parse_handshake_payload(payload: &[u8]) -> Option<(u8, u16)> {
    if payload.len() != constants::HANDSHAKE_LEN {
        return None;
    }
    Some((payload[0], (u16::from(payload[2]) << 8) | u16::from(payload[1])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_input_is_basis() {
        assert_eq!(checksum(&[]), 0x0097);
    }

    #[test]
    fn checksum_of_known_payload() {
        assert_eq!(checksum(&[1, 2, 3]), 0x1937);
    }

    #[test]
    fn version_start_bytes_span_0x30_to_0x39() {
        for b in 0..=u8::MAX {
            assert_eq!(is_version_start_byte(b), (0x30..=0x39).contains(&b));
        }
    }

    #[test]
    fn control_start_bytes_span_0x41_to_0x5a() {
        for b in 0..=u8::MAX {
            assert_eq!(is_control_start_byte(b), (0x41..=0x5A).contains(&b));
        }
    }

    #[test]
    fn handshake_start_bytes_are_exactly_three() {
        for b in 0..=u8::MAX {
            assert_eq!(
                is_handshake_start_byte(b),
                b == 0x2A || b == 0x2B || b == 0x2E
            );
        }
    }

    #[test]
    fn supported_set_matches_enumerated_values() {
        let supported = [0x30, 0x41, 0x46, 0x48, 0x50, 0x52, 0x2A, 0x2B, 0x2E, 0x7E];
        for b in 0..=u8::MAX {
            assert_eq!(is_supported_start_byte(b), supported.contains(&b));
        }
    }

    #[test]
    fn undefined_is_not_supported() {
        assert!(!is_supported_start_byte(StartByte::Undefined.as_byte()));
    }

    #[test]
    fn start_byte_classification_round_trips() {
        for b in 0..=u8::MAX {
            let start = StartByte::from_byte(b);
            if start != StartByte::Undefined {
                assert_eq!(start.as_byte(), b);
            }
        }
    }

    #[test]
    fn seed_recovery_holds_for_all_inputs() {
        for id in 0..=u8::MAX {
            for seed in 0..=u8::MAX {
                let encoded = encode_seed(id, seed);
                assert_eq!(decode_seed(id, encoded), seed);
                assert!(verify_seed(id, seed, encoded));
            }
        }
    }

    #[test]
    fn tampered_high_byte_fails_verification() {
        let encoded = encode_seed(7, 0x5C);
        let tampered = encoded ^ 0x0100;
        let seed = decode_seed(7, tampered);
        assert!(!verify_seed(7, seed, tampered));
    }

    #[test]
    fn handshake_payload_round_trips() {
        let payload = handshake_payload(1, 7, 0x42);
        let (version, encoded) = parse_handshake_payload(&payload).unwrap();
        assert_eq!(version, 1);
        assert_eq!(decode_seed(7, encoded), 0x42);
    }

    #[test]
    fn short_handshake_payload_is_rejected() {
        assert!(parse_handshake_payload(&[1, 2]).is_none());
        assert!(parse_handshake_payload(&[1, 2, 3, 4]).is_none());
    }

    #[test]
    fn empty_frame_is_empty() {
        assert!(Frame::empty().is_empty());
        assert!(!Frame::control(StartByte::Ping, 1, 1).is_empty());
    }
}
