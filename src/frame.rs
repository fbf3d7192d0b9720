//! HTTP/3 frame layer (RFC 9114 Section 7).
//!
//! Frames are `type (varint) | length (varint) | payload`. Varints are the
//! QUIC variable-length integers of RFC 9000 Section 16.

use bytes::{BufMut, BytesMut};

use crate::error::CodecError;

/// HTTP/3 frame types
pub mod frame_type {
    pub const DATA: u64 = 0x0;
    pub const HEADERS: u64 = 0x1;
    pub const CANCEL_PUSH: u64 = 0x3;
    pub const SETTINGS: u64 = 0x4;
    pub const PUSH_PROMISE: u64 = 0x5;
    pub const GOAWAY: u64 = 0x7;
    pub const MAX_PUSH_ID: u64 = 0xD;
}

/// Largest value a varint can carry.
pub const MAX_VARINT: u64 = (1 << 62) - 1;

/// Number of bytes `value` takes as a varint, or `None` if it does not fit.
pub fn varint_len(value: u64) -> Option<usize> {
    match value {
        0..=0x3F => Some(1),
        0x40..=0x3FFF => Some(2),
        0x4000..=0x3FFF_FFFF => Some(4),
        0x4000_0000..=MAX_VARINT => Some(8),
        _ => None,
    }
}

/// Append `value` as a varint, returning the bytes written.
pub fn encode_varint(value: u64, out: &mut BytesMut) -> Result<usize, CodecError> {
    let len = varint_len(value).ok_or(CodecError::VarintOverflow(value))?;
    match len {
        1 => out.put_u8(value as u8),
        2 => out.put_u16(0x4000 | value as u16),
        4 => out.put_u32(0x8000_0000 | value as u32),
        _ => out.put_u64(0xC000_0000_0000_0000 | value),
    }
    Ok(len)
}

/// Decode a varint from the front of `data`.
///
/// Returns `None` when more bytes are needed.
pub fn decode_varint(data: &[u8]) -> Option<(u64, usize)> {
    let first = *data.first()?;
    let len = 1usize << (first >> 6);
    if data.len() < len {
        return None;
    }
    let mut value = u64::from(first & 0x3F);
    for byte in &data[1..len] {
        value = (value << 8) | u64::from(*byte);
    }
    Some((value, len))
}

/// A parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: u64,
    pub length: u64,
    /// Bytes taken by the type and length varints.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a frame header, or `None` if `data` does not hold one yet.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (frame_type, type_len) = decode_varint(data)?;
        let (length, length_len) = decode_varint(&data[type_len..])?;
        Some(Self {
            frame_type,
            length,
            header_len: type_len + length_len,
        })
    }

    /// Total frame size including header, saturating on absurd lengths
    pub fn total_size(&self) -> usize {
        usize::try_from(self.length)
            .unwrap_or(usize::MAX)
            .saturating_add(self.header_len)
    }

    /// Frames that only belong on the control stream.
    pub fn is_control_only(&self) -> bool {
        matches!(
            self.frame_type,
            frame_type::SETTINGS
                | frame_type::GOAWAY
                | frame_type::MAX_PUSH_ID
                | frame_type::CANCEL_PUSH
        )
    }
}

/// Append a complete frame, returning the bytes written.
pub fn write_frame(out: &mut BytesMut, frame_type: u64, payload: &[u8]) -> Result<usize, CodecError> {
    let mut written = encode_varint(frame_type, out)?;
    written += encode_varint(payload.len() as u64, out)?;
    out.extend_from_slice(payload);
    Ok(written + payload.len())
}

/// Append a GOAWAY frame carrying `id`.
pub fn create_goaway(out: &mut BytesMut, id: u64) -> Result<usize, CodecError> {
    let mut payload = BytesMut::with_capacity(8);
    encode_varint(id, &mut payload)?;
    write_frame(out, frame_type::GOAWAY, &payload)
}
