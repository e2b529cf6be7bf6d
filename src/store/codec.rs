//! Value Framing
//!
//! Every value written by the file-backed store is framed so torn or
//! corrupted writes are detected on read.
//!
//! Frame format: `[magic: 8][version: u32][flags: u8][length: u32][data][checksum: u32]`

use crate::error::{Error, Result};

/// Magic bytes at the start of each framed value
const FRAME_MAGIC: &[u8; 8] = b"WOLFCTRL";

/// Frame format version
const FRAME_VERSION: u32 = 1;

/// Header size in bytes
const HEADER_SIZE: usize = 8 + 4 + 1 + 4;

/// Trailer size in bytes
const TRAILER_SIZE: usize = 4;

const FLAG_COMPRESSED: u8 = 0x01;

/// Frame a value, compressing it with LZ4 when requested
pub fn encode(value: &[u8], compression: bool) -> Vec<u8> {
    let (flags, data) = if compression {
        (FLAG_COMPRESSED, lz4_flex::compress_prepend_size(value))
    } else {
        (0u8, value.to_vec())
    };

    let checksum = crc32fast::hash(&data);

    let mut out = Vec::with_capacity(HEADER_SIZE + data.len() + TRAILER_SIZE);
    out.extend_from_slice(FRAME_MAGIC);
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.push(flags);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum.to_le_bytes());
    out
}

/// Verify and unframe a value
pub fn decode(key: &str, frame: &[u8]) -> Result<Vec<u8>> {
    let corrupted = |reason: &str| Error::Corrupted {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if frame.len() < HEADER_SIZE + TRAILER_SIZE {
        return Err(corrupted("frame too short"));
    }

    if &frame[0..8] != FRAME_MAGIC {
        return Err(corrupted("invalid magic bytes"));
    }

    let version = read_u32(&frame[8..12]);
    if version != FRAME_VERSION {
        return Err(corrupted(&format!("unsupported frame version {}", version)));
    }

    let flags = frame[12];
    let length = read_u32(&frame[13..17]) as usize;
    if frame.len() != HEADER_SIZE + length + TRAILER_SIZE {
        return Err(corrupted("length mismatch"));
    }

    let data = &frame[HEADER_SIZE..HEADER_SIZE + length];
    let stored_checksum = read_u32(&frame[HEADER_SIZE + length..]);
    if crc32fast::hash(data) != stored_checksum {
        return Err(corrupted("checksum mismatch"));
    }

    if flags & FLAG_COMPRESSED != 0 {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| corrupted(&format!("decompression failed: {}", e)))
    } else {
        Ok(data.to_vec())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
