//! Connection-wide header compression.
//!
//! One `CompressionContext` serves every stream on the connection, and
//! per-stream codecs borrow it for the duration of a call instead of owning
//! a copy.
//!
//! Field sections use HPACK representations restricted to the static table
//! and literals that are never inserted into a dynamic table. The dynamic
//! table capacity is therefore zero in both directions: a field section
//! decodes the same whichever stream's block arrives first, and nothing is
//! ever written to the encoder stream. A peer block that references or
//! modifies a dynamic table is a decode error. Each decoded section is
//! acknowledged on the decoder stream with the RFC 9204 Section
//! Acknowledgment encoding.
//!
//! Decoding (including Huffman-coded strings) goes through `fluke-hpack`
//! once a block has been checked against the restrictions above.

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::error::CompressionError;
use crate::stream_id::StreamId;

/// Per-field overhead used when sizing a header list (RFC 9114 Section 4.2.2).
pub const HEADER_FIELD_OVERHEAD: u64 = 32;

/// A decoded header field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of this field for MAX_FIELD_SECTION_SIZE accounting.
    pub fn list_size(&self) -> u64 {
        (self.name.len() + self.value.len()) as u64 + HEADER_FIELD_OVERHEAD
    }
}

/// Size of a header list for MAX_FIELD_SECTION_SIZE accounting.
pub fn header_list_size(headers: &[Header]) -> u64 {
    headers.iter().map(Header::list_size).sum()
}

/// Running counters for the shared context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressionInfo {
    pub blocks_encoded: u64,
    pub blocks_decoded: u64,
    /// Header list bytes handed to the encoder.
    pub egress_uncompressed: u64,
    /// Header block bytes the encoder produced.
    pub egress_compressed: u64,
    pub ingress_uncompressed: u64,
    pub ingress_compressed: u64,
}

/// The connection's single compression context.
pub struct CompressionContext {
    decoder: fluke_hpack::Decoder<'static>,
    info: CompressionInfo,
}

impl std::fmt::Debug for CompressionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionContext")
            .field("info", &self.info)
            .finish()
    }
}

impl Default for CompressionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionContext {
    pub fn new() -> Self {
        Self {
            decoder: fluke_hpack::Decoder::new(),
            info: CompressionInfo::default(),
        }
    }

    /// Encode `headers` into a self-contained header block.
    pub fn encode(&mut self, headers: &[Header]) -> Vec<u8> {
        let mut block = BytesMut::new();
        for header in headers {
            encode_field(&mut block, header);
        }

        self.info.blocks_encoded += 1;
        self.info.egress_uncompressed += header_list_size(headers);
        self.info.egress_compressed += block.len() as u64;
        block.to_vec()
    }

    /// Decode a header block received on `stream_id`.
    ///
    /// On success a Section Acknowledgment for the stream is appended to
    /// `decoder_stream`.
    pub fn decode(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
        decoder_stream: &mut BytesMut,
    ) -> Result<Vec<Header>, CompressionError> {
        check_field_section(block).map_err(|reason| {
            trace!(stream_id, reason, "rejecting header block");
            CompressionError::Decode {
                stream_id,
                reason: reason.to_string(),
            }
        })?;
        let pairs = self
            .decoder
            .decode(block)
            .map_err(|e| CompressionError::Decode {
                stream_id,
                reason: format!("{:?}", e),
            })?;
        let headers: Vec<Header> = pairs
            .into_iter()
            .map(|(name, value)| {
                Header::new(
                    String::from_utf8_lossy(&name).into_owned(),
                    String::from_utf8_lossy(&value).into_owned(),
                )
            })
            .collect();

        encode_prefixed_integer(decoder_stream, 0x80, 7, stream_id);
        self.info.blocks_decoded += 1;
        self.info.ingress_compressed += block.len() as u64;
        self.info.ingress_uncompressed += header_list_size(&headers);
        Ok(headers)
    }

    pub fn compression_info(&self) -> CompressionInfo {
        self.info
    }
}

// ============================================================================
// Field representations
// ============================================================================

/// Indexed field line: `1xxxxxxx`
const INDEXED: u8 = 0x80;
/// Literal with incremental indexing: `01xxxxxx`
const LITERAL_WITH_INDEXING: u8 = 0x40;
/// Dynamic table size update: `001xxxxx`
const SIZE_UPDATE: u8 = 0x20;
/// Literal without indexing: `0000xxxx`; never indexed is `0001xxxx`
const LITERAL_WITHOUT_INDEXING: u8 = 0x00;

fn encode_field(out: &mut BytesMut, header: &Header) {
    match static_lookup(&header.name, &header.value) {
        StaticMatch::Field(index) => encode_prefixed_integer(out, INDEXED, 7, index),
        StaticMatch::Name(index) => {
            encode_prefixed_integer(out, LITERAL_WITHOUT_INDEXING, 4, index);
            encode_string(out, &header.value);
        }
        StaticMatch::None => {
            out.put_u8(LITERAL_WITHOUT_INDEXING);
            encode_string(out, &header.name);
            encode_string(out, &header.value);
        }
    }
}

/// Raw (non-Huffman) string literal.
fn encode_string(out: &mut BytesMut, value: &str) {
    encode_prefixed_integer(out, 0x00, 7, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

/// Walk every representation in `block`, rejecting anything that touches a
/// dynamic table or runs past the end of the block.
fn check_field_section(block: &[u8]) -> Result<(), &'static str> {
    let mut pos = 0;
    while pos < block.len() {
        let first = block[pos];
        if first & INDEXED != 0 {
            let (index, len) =
                decode_prefixed_integer(&block[pos..], 7).ok_or("truncated field index")?;
            check_static_index(index)?;
            pos += len;
        } else if first & LITERAL_WITH_INDEXING != 0 {
            return Err("dynamic table insertion in field section");
        } else if first & SIZE_UPDATE != 0 {
            return Err("dynamic table size update in field section");
        } else {
            let (index, len) =
                decode_prefixed_integer(&block[pos..], 4).ok_or("truncated name index")?;
            pos += len;
            if index == 0 {
                pos = skip_string(block, pos)?;
            } else {
                check_static_index(index)?;
            }
            pos = skip_string(block, pos)?;
        }
    }
    Ok(())
}

fn check_static_index(index: u64) -> Result<(), &'static str> {
    match usize::try_from(index) {
        Ok(i) if (1..=STATIC_TABLE.len()).contains(&i) => Ok(()),
        _ => Err("field index outside the static table"),
    }
}

/// Returns the position just past the string literal starting at `pos`.
fn skip_string(block: &[u8], pos: usize) -> Result<usize, &'static str> {
    let (len, len_bytes) =
        decode_prefixed_integer(&block[pos..], 7).ok_or("truncated string length")?;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| (pos + len_bytes).checked_add(len))
        .ok_or("string length overflow")?;
    if end > block.len() {
        return Err("truncated string literal");
    }
    Ok(end)
}

/// Append an RFC 7541 Section 5.1 prefixed integer; `flags` fills the bits
/// above the prefix.
pub fn encode_prefixed_integer(out: &mut BytesMut, flags: u8, prefix_bits: u8, value: u64) {
    let max_prefix = (1u64 << prefix_bits) - 1;
    if value < max_prefix {
        out.put_u8(flags | value as u8);
        return;
    }
    out.put_u8(flags | max_prefix as u8);
    let mut rest = value - max_prefix;
    while rest >= 0x80 {
        out.put_u8((rest & 0x7F) as u8 | 0x80);
        rest >>= 7;
    }
    out.put_u8(rest as u8);
}

/// Decode an RFC 7541 Section 5.1 prefixed integer from the front of `data`.
///
/// Returns the value and the bytes it took, or `None` if the integer is
/// incomplete or does not fit in 64 bits.
pub fn decode_prefixed_integer(data: &[u8], prefix_bits: u8) -> Option<(u64, usize)> {
    let max_prefix = (1u64 << prefix_bits) - 1;
    let mut value = u64::from(*data.first()?) & max_prefix;
    if value < max_prefix {
        return Some((value, 1));
    }
    let mut shift = 0u32;
    for (i, byte) in data[1..].iter().enumerate() {
        if shift > 56 {
            return None;
        }
        value = value.checked_add(u64::from(byte & 0x7F) << shift)?;
        if byte & 0x80 == 0 {
            return Some((value, i + 2));
        }
        shift += 7;
    }
    None
}

// ============================================================================
// Static table (RFC 7541 Appendix A)
// ============================================================================

enum StaticMatch {
    /// Name and value both match.
    Field(u64),
    /// Only the name matches.
    Name(u64),
    None,
}

fn static_lookup(name: &str, value: &str) -> StaticMatch {
    let mut name_match = None;
    for (i, (entry_name, entry_value)) in STATIC_TABLE.iter().enumerate() {
        if *entry_name != name {
            continue;
        }
        let index = i as u64 + 1;
        if *entry_value == value {
            return StaticMatch::Field(index);
        }
        name_match.get_or_insert(index);
    }
    name_match.map_or(StaticMatch::None, StaticMatch::Name)
}

const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

// ============================================================================
// Tests
// ============================================================================
