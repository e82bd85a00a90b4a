//! Framing codec for one transfer.
//!
//! Layout, big-endian throughout:
//!
//! ```text
//! [u32 L1][L1 bytes: UTF-8 JSON metadata][u32 L2][L2 bytes: payload]
//! ```
//!
//! Lengths are always derived from the encoded segments. The decoder performs four
//! sequential reads of known size and tells a clean end of stream at a frame
//! boundary apart from a peer that vanished mid-frame.

use std::fmt;
use std::io::{self, Read, Write};

use crate::metadata::{Metadata, MetadataError};
use crate::protocol::{LEN_PREFIX_SIZE, MAX_METADATA_LEN, PAYLOAD_RESERVE_MAX};

/// One decoded transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub metadata: Metadata,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Metadata,
    Payload,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Metadata => f.write_str("metadata"),
            Segment::Payload => f.write_str("payload"),
        }
    }
}

/// Why a length prefix could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFault {
    /// Stream ended after `received` of the four prefix bytes
    Short { received: usize },
    /// A metadata length of zero; every transfer carries metadata
    EmptyMetadata,
}

impl fmt::Display for HeaderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderFault::Short { received } => {
                write!(f, "stream ended after {} of {} length bytes", received, LEN_PREFIX_SIZE)
            }
            HeaderFault::EmptyMetadata => f.write_str("zero-length metadata segment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("truncated frame header: {0}")]
    TruncatedHeader(HeaderFault),

    #[error("truncated {segment} segment: got {received} of {expected} bytes")]
    TruncatedBody {
        segment: Segment,
        expected: usize,
        received: usize,
    },

    #[error("malformed metadata: {0}")]
    MalformedMetadata(#[from] MetadataError),

    #[error("{segment} segment of {len} bytes does not fit a 32-bit length prefix")]
    SegmentTooLarge { segment: Segment, len: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn segment_len(segment: Segment, len: usize) -> Result<u32, FrameError> {
    u32::try_from(len).map_err(|_| FrameError::SegmentTooLarge { segment, len })
}

/// Everything up to (not including) the payload bytes
fn build_head(metadata: &Metadata, payload_len: usize) -> Result<Vec<u8>, FrameError> {
    // Refuse anything the decoder would reject, before a byte is written
    let meta = metadata.to_wire_bytes()?;
    let l1 = segment_len(Segment::Metadata, meta.len())?;
    let l2 = segment_len(Segment::Payload, payload_len)?;
    let mut head = Vec::with_capacity(2 * LEN_PREFIX_SIZE + meta.len());
    head.extend_from_slice(&l1.to_be_bytes());
    head.extend_from_slice(&meta);
    head.extend_from_slice(&l2.to_be_bytes());
    Ok(head)
}

/// Encode a complete frame into one buffer
pub fn encode_frame(metadata: &Metadata, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut buf = build_head(metadata, payload.len())?;
    buf.reserve_exact(payload.len());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode and write a frame. The payload goes straight to the writer without
/// being copied into the header buffer.
pub fn write_frame<W: Write>(
    w: &mut W,
    metadata: &Metadata,
    payload: &[u8],
) -> Result<(), FrameError> {
    let head = build_head(metadata, payload.len())?;
    w.write_all(&head)?;
    w.write_all(payload)?;
    w.flush()?;
    Ok(())
}

/// Read until `buf` is full or the stream ends; returns the bytes filled
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `Ok(None)` means the stream ended before the first prefix byte
fn read_len_prefix<R: Read>(r: &mut R) -> Result<Option<usize>, FrameError> {
    let mut buf = [0u8; LEN_PREFIX_SIZE];
    match read_full(r, &mut buf)? {
        0 => Ok(None),
        LEN_PREFIX_SIZE => Ok(Some(u32::from_be_bytes(buf) as usize)),
        received => Err(FrameError::TruncatedHeader(HeaderFault::Short { received })),
    }
}

fn read_segment<R: Read>(r: &mut R, segment: Segment, len: usize) -> Result<Vec<u8>, FrameError> {
    // Grow with the data rather than trusting the declared length for allocation
    let mut buf = Vec::with_capacity(len.min(PAYLOAD_RESERVE_MAX));
    r.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(FrameError::TruncatedBody {
            segment,
            expected: len,
            received: buf.len(),
        });
    }
    Ok(buf)
}

/// Read one frame.
///
/// Returns `Ok(None)` when the stream closed cleanly exactly at a frame boundary.
/// Presence of `file_name`/`sha256` is not checked here.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<Frame>, FrameError> {
    let meta_len = match read_len_prefix(r)? {
        Some(n) => n,
        None => return Ok(None),
    };
    if meta_len == 0 {
        return Err(FrameError::TruncatedHeader(HeaderFault::EmptyMetadata));
    }
    if meta_len > MAX_METADATA_LEN {
        return Err(MetadataError::TooLarge(meta_len).into());
    }
    let meta_bytes = read_segment(r, Segment::Metadata, meta_len)?;
    let metadata = Metadata::from_json_bytes(&meta_bytes)?;

    // Past the first prefix a clean EOF is no longer a boundary
    let payload_len = read_len_prefix(r)?
        .ok_or(FrameError::TruncatedHeader(HeaderFault::Short { received: 0 }))?;
    let payload = read_segment(r, Segment::Payload, payload_len)?;
    tracing::debug!(meta_len, payload_len, "frame decoded");

    Ok(Some(Frame { metadata, payload }))
}
