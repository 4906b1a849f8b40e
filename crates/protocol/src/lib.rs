// Copyright 2025-2026 CEMAXECUTER LLC

pub mod fec;
pub mod gf256;
pub mod meta;
pub mod packer;
pub mod unpacker;

use byteorder::{ByteOrder, LittleEndian};

/// Datagram size on the wire. Every block is exactly this long.
pub const BLOCK_BYTES: usize = 512;
/// Block header: frame index (u16 LE), block index (u8), reserved (u8).
pub const HEADER_BYTES: usize = 4;
/// Block body carried after the header.
pub const BODY_BYTES: usize = BLOCK_BYTES - HEADER_BYTES;

/// FEC-protected data blocks per frame (one meta block + 127 sample blocks).
pub const DATA_BLOCKS: usize = 128;
/// Sample-carrying blocks per frame.
pub const SAMPLE_BLOCKS: usize = DATA_BLOCKS - 1;
/// Upper bound on redundancy blocks; data + parity must fit an 8-bit index.
pub const MAX_FEC_BLOCKS: usize = 127;

/// Header of a 512-byte block datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub frame_index: u16,
    pub block_index: u8,
}

impl BlockHeader {
    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u16(&mut buf[0..2], self.frame_index);
        buf[2] = self.block_index;
        buf[3] = 0; // reserved
    }

    /// Parse a header. The reserved byte is ignored on receive.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != BLOCK_BYTES {
            return Err(FrameError::BadLength(buf.len()));
        }
        let block_index = buf[2];
        if block_index as usize >= DATA_BLOCKS + MAX_FEC_BLOCKS {
            return Err(FrameError::BadBlockIndex(block_index));
        }
        Ok(Self {
            frame_index: LittleEndian::read_u16(&buf[0..2]),
            block_index,
        })
    }
}

/// Datagram-level and frame-level failures seen on the receive path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("datagram length {0}, expected {BLOCK_BYTES}")]
    BadLength(usize),
    #[error("block index {0} out of range")]
    BadBlockIndex(u8),
    #[error("meta block CRC mismatch")]
    Crc,
    #[error("meta block carries invalid stream parameters")]
    BadMeta,
}

/// Erasure-decoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FecError {
    #[error("{present} of {DATA_BLOCKS} required blocks present")]
    InsufficientBlocks { present: usize },
}
