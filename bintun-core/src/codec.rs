//! Frame codec: serialisation, parsing and structural validation of the
//! fixed-header / variable-payload wire format.
//!
//! The checksum covers the payload bytes only and is applied identically
//! on both sides; an empty payload hashes to `0x0097`.

use crate::io::Wire;
use crate::protocol::{
    checksum, constants, is_supported_start_byte, Frame, StartByte, ValidationStatus,
};
use bytes::{BufMut, BytesMut};
use std::io;
use std::net::SocketAddr;

/// Serialise a frame into `out`: start, device, message, size, payload,
/// then the 2-byte payload checksum MSB-first.
pub fn encode(frame: &Frame<'_>, out: &mut BytesMut) {
    out.put_u8(frame.start.as_byte());
    out.put_u8(frame.device_id);
    out.put_u8(frame.message_id);
    out.put_u8(frame.size());
    if let Some(payload) = frame.payload {
        out.put_slice(payload);
    }
    out.put_u16(checksum(frame.payload.unwrap_or(&[])));
}

/// Parse one datagram. Returns the frame (empty if the datagram was
/// unreadable) together with its validation status; the payload borrows
/// from `datagram`.
pub fn decode(datagram: &[u8]) -> (Frame<'_>, ValidationStatus) {
    let n = datagram.len();
    if n <= constants::HEADER_LEN {
        return (Frame::empty(), ValidationStatus::UnexpectedEndOfStream);
    }

    let size = datagram[3] as usize;
    if n != size + constants::FRAME_OVERHEAD {
        return (Frame::empty(), ValidationStatus::UnexpectedEndOfStream);
    }

    let frame = Frame {
        start: StartByte::from_byte(datagram[0]),
        device_id: datagram[1],
        message_id: datagram[2],
        payload: if size == 0 {
            None
        } else {
            Some(&datagram[constants::HEADER_LEN..constants::HEADER_LEN + size])
        },
    };

    let received = u16::from_be_bytes([datagram[n - 2], datagram[n - 1]]);
    let mut status = validate(&frame);
    if status.is_ok() && checksum(frame.payload.unwrap_or(&[])) != received {
        status = ValidationStatus::IncorrectChecksum;
    }

    (frame, status)
}

/// Structural validation, first failure wins. Callable on any frame,
/// not just decoded ones.
pub fn validate(frame: &Frame<'_>) -> ValidationStatus {
    if !is_supported_start_byte(frame.start.as_byte()) {
        return ValidationStatus::MissedStartByte;
    }
    if frame.device_id == 0 {
        return ValidationStatus::MissedDeviceId;
    }
    if frame.message_id == 0 {
        return ValidationStatus::MissedMessageId;
    }
    if frame.start == StartByte::DataV1 && frame.size() == 0 {
        return ValidationStatus::IncorrectFormat;
    }
    // A present payload must carry at least one byte; the size byte and
    // the slice length cannot disagree any other way.
    if matches!(frame.payload, Some(p) if p.is_empty()) {
        return ValidationStatus::IncorrectFormat;
    }
    match frame.start {
        StartByte::HandshakeInit | StartByte::HandshakeResp | StartByte::HandshakeComplete
            if frame.size() as usize != constants::HANDSHAKE_LEN =>
        {
            ValidationStatus::IncorrectFormat
        }
        StartByte::Ping
        | StartByte::Confirm
        | StartByte::IncorrectFormat
        | StartByte::IncorrectChecksum
        | StartByte::Rejected
        | StartByte::Disconnect
            if frame.size() != 0 =>
        {
            ValidationStatus::IncorrectFormat
        }
        _ => ValidationStatus::Ok,
    }
}

/// Read side of the codec. Owns the reusable receive buffer that backs
/// inbound payload borrows; its contents are overwritten on every read.
/// The buffer is allocated on first use so a taken-out codec can be
/// swapped back without cost.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull at most one datagram off the wire and parse it. Returns
    /// `None` when no datagram is pending. The frame payload is valid
    /// until the next call.
    pub fn read<'a, W: Wire>(
        &'a mut self,
        wire: &mut W,
    ) -> io::Result<Option<(Frame<'a>, ValidationStatus, SocketAddr)>> {
        if self.buf.len() < constants::MAX_FRAME {
            self.buf.resize(constants::MAX_FRAME, 0);
        }
        let Some((n, from)) = wire.try_recv(&mut self.buf)? else {
            return Ok(None);
        };
        let (frame, status) = decode(&self.buf[..n]);
        Ok(Some((frame, status, from)))
    }
}
