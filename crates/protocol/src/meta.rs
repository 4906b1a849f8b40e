// Copyright 2025-2026 CEMAXECUTER LLC

//! Meta block (block index 0) body codec.
//!
//! First 24 bytes are populated, little-endian; the remaining 484 bytes of
//! the body are reserved and zero-filled. The CRC32 at offset 20 covers the
//! preceding 20 bytes (IEEE reflected polynomial, as computed by crc32fast).

use byteorder::{ByteOrder, LittleEndian};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{FrameError, BODY_BYTES, DATA_BLOCKS, MAX_FEC_BLOCKS};

/// Populated span of the meta body.
pub const META_BYTES: usize = 24;
/// Span covered by the CRC.
const CRC_SPAN: usize = 20;

/// Stream parameters carried in every frame's meta block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaData {
    /// Center frequency in kHz.
    pub center_freq_khz: u32,
    /// Stream sample rate in samples/sec.
    pub sample_rate: u32,
    /// Bytes per I or Q component (1 or 2).
    pub sample_bytes: u8,
    /// Effective bits per sample (8..16).
    pub sample_bits: u8,
    /// FEC-protected data blocks per frame; always 128.
    pub data_blocks: u8,
    /// Redundancy blocks per frame (0..127).
    pub fec_blocks: u8,
    /// Unix epoch seconds at frame origination.
    pub ts_sec: u32,
    /// Microseconds within that second.
    pub ts_usec: u32,
}

impl MetaData {
    /// IQ samples carried by one 508-byte sample block.
    pub fn samples_per_block(&self) -> usize {
        BODY_BYTES / (2 * self.sample_bytes as usize)
    }

    /// IQ samples conveyed by a complete frame.
    pub fn samples_per_frame(&self) -> usize {
        crate::SAMPLE_BLOCKS * self.samples_per_block()
    }

    /// Stamp with the current wall clock.
    pub fn timestamp_now(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.ts_sec = now.as_secs() as u32;
        self.ts_usec = now.subsec_micros();
    }

    /// Serialize into a 508-byte block body.
    pub fn to_body(&self) -> Vec<u8> {
        let mut body = vec![0u8; BODY_BYTES];
        LittleEndian::write_u32(&mut body[0..4], self.center_freq_khz);
        LittleEndian::write_u32(&mut body[4..8], self.sample_rate);
        body[8] = self.sample_bytes;
        body[9] = self.sample_bits;
        body[10] = self.data_blocks;
        body[11] = self.fec_blocks;
        LittleEndian::write_u32(&mut body[12..16], self.ts_sec);
        LittleEndian::write_u32(&mut body[16..20], self.ts_usec);
        let crc = crc32fast::hash(&body[..CRC_SPAN]);
        LittleEndian::write_u32(&mut body[20..META_BYTES], crc);
        body
    }

    /// Parse and validate a meta body.
    pub fn from_body(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() != BODY_BYTES {
            return Err(FrameError::BadLength(body.len()));
        }
        let crc = LittleEndian::read_u32(&body[20..META_BYTES]);
        if crc32fast::hash(&body[..CRC_SPAN]) != crc {
            return Err(FrameError::Crc);
        }
        let meta = Self {
            center_freq_khz: LittleEndian::read_u32(&body[0..4]),
            sample_rate: LittleEndian::read_u32(&body[4..8]),
            sample_bytes: body[8],
            sample_bits: body[9],
            data_blocks: body[10],
            fec_blocks: body[11],
            ts_sec: LittleEndian::read_u32(&body[12..16]),
            ts_usec: LittleEndian::read_u32(&body[16..20]),
        };
        if !matches!(meta.sample_bytes, 1 | 2)
            || meta.data_blocks as usize != DATA_BLOCKS
            || meta.fec_blocks as usize > MAX_FEC_BLOCKS
        {
            return Err(FrameError::BadMeta);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> MetaData {
        MetaData {
            center_freq_khz: 433_970,
            sample_rate: 48_000,
            sample_bytes: 2,
            sample_bits: 16,
            data_blocks: DATA_BLOCKS as u8,
            fec_blocks: 8,
            ts_sec: 1_700_000_000,
            ts_usec: 123_456,
        }
    }

    #[test]
    fn test_meta_roundtrip() {
        let meta = sample_meta();
        let body = meta.to_body();
        assert_eq!(body.len(), BODY_BYTES);
        // reserved region stays zero
        assert!(body[META_BYTES..].iter().all(|&b| b == 0));
        assert_eq!(MetaData::from_body(&body).unwrap(), meta);
    }

    #[test]
    fn test_meta_any_bit_flip_fails_crc() {
        let body = sample_meta().to_body();
        for byte in 0..CRC_SPAN {
            for bit in 0..8 {
                let mut corrupt = body.clone();
                corrupt[byte] ^= 1 << bit;
                assert_eq!(
                    MetaData::from_body(&corrupt),
                    Err(FrameError::Crc),
                    "flip of byte {} bit {} not detected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_meta_rejects_bad_sample_bytes() {
        let mut meta = sample_meta();
        meta.sample_bytes = 3;
        // CRC is valid, the parameters are not
        assert_eq!(
            MetaData::from_body(&meta.to_body()),
            Err(FrameError::BadMeta)
        );
    }

    #[test]
    fn test_samples_per_frame() {
        let mut meta = sample_meta();
        assert_eq!(meta.samples_per_block(), 127);
        assert_eq!(meta.samples_per_frame(), 127 * 127);
        meta.sample_bytes = 1;
        assert_eq!(meta.samples_per_block(), 254);
        assert_eq!(meta.samples_per_frame(), 127 * 254);
    }
}
