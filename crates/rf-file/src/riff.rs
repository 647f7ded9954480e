//! Minimal little-endian RIFF chunk walker.
//!
//! WAV container parsing is an external collaborator per the engine's
//! scope: this module is the thin, self-contained boundary implementation
//! that the rest of the pipeline is built against. It knows nothing about
//! sample formats or pipe-sample semantics, only how to iterate the chunk
//! list of a RIFF/WAVE file and hand back each chunk's four-character tag
//! and raw bytes.

use rf_core::{RfError, RfResult};

pub struct RiffChunk<'a> {
    pub id: [u8; 4],
    pub data: &'a [u8],
}

/// Parse the outer `RIFF....WAVE` header and return the chunk list bytes
/// (everything after the `WAVE` tag).
pub fn open_riff_wave(bytes: &[u8]) -> RfResult<&[u8]> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(RfError::NotAWave);
    }
    Ok(&bytes[12..])
}

/// Iterate the top-level chunks of a WAVE chunk list, in file order.
pub fn iter_chunks(mut body: &[u8]) -> impl Iterator<Item = RfResult<RiffChunk<'_>>> {
    // Set once a chunk's declared size overran the buffer: the partial chunk
    // is still handed back (callers may salvage what bytes arrived), but the
    // very next call reports the truncation rather than looking like a clean
    // end of the chunk list.
    let mut truncated_tail = false;
    std::iter::from_fn(move || {
        if truncated_tail {
            truncated_tail = false;
            return Some(Err(RfError::FileTruncated));
        }
        if body.len() < 8 {
            return if body.is_empty() {
                None
            } else {
                Some(Err(RfError::FileTruncated))
            };
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&body[0..4]);
        let size = u32::from_le_bytes(body[4..8].try_into().unwrap()) as usize;
        let padded = size + (size & 1);
        if body.len() < 8 + size {
            // Truncated chunk: surface what's available, then report
            // truncation on the next call.
            let data = &body[8..];
            body = &[];
            truncated_tail = true;
            return Some(Ok(RiffChunk { id, data }));
        }
        let data = &body[8..8 + size];
        body = &body[(8 + padded).min(body.len())..];
        Some(Ok(RiffChunk { id, data }))
    })
}

pub fn u16_le(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(b[off..off + 2].try_into().unwrap())
}

pub fn u32_le(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}

pub fn i32_le(b: &[u8], off: usize) -> i32 {
    i32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}
