// Copyright 2025-2026 CEMAXECUTER LLC

//! Receive-side frame packer: turns the decimated sample stream into
//! self-describing 512-byte block datagrams.

use byteorder::{ByteOrder, LittleEndian};

use crate::meta::MetaData;
use crate::{fec, BlockHeader, BLOCK_BYTES, BODY_BYTES, DATA_BLOCKS, SAMPLE_BLOCKS};

/// Parameters a frame is built under. Constant for the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub center_freq_khz: u32,
    pub sample_rate: u32,
    /// Bytes per I or Q component on the wire (1 or 2).
    pub sample_bytes: u8,
    pub sample_bits: u8,
    pub fec_blocks: u8,
}

impl StreamParams {
    pub fn samples_per_block(&self) -> usize {
        BODY_BYTES / (2 * self.sample_bytes as usize)
    }

    pub fn samples_per_frame(&self) -> usize {
        SAMPLE_BLOCKS * self.samples_per_block()
    }
}

/// Accumulates IQ samples and emits whole frames; no frame leaves until all
/// 127 sample blocks are full. Samples are interleaved i16 I/Q pairs; with
/// a 1-byte wire format only the high byte of each component is sent.
pub struct FramePacker {
    params: StreamParams,
    frame_index: u16,
    acc: Vec<i16>,
}

impl FramePacker {
    pub fn new(params: StreamParams) -> Self {
        Self { params, frame_index: 0, acc: Vec::new() }
    }

    /// Switch stream parameters. A partially accumulated frame is discarded
    /// so no emitted frame ever mixes parameter sets.
    pub fn set_params(&mut self, params: StreamParams) {
        if params != self.params {
            if !self.acc.is_empty() {
                log::debug!(
                    "packer reconfigured, dropping {} accumulated samples",
                    self.acc.len() / 2
                );
            }
            self.params = params;
            self.acc.clear();
        }
    }

    pub fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Samples accumulated toward the next frame.
    pub fn pending_samples(&self) -> usize {
        self.acc.len() / 2
    }

    /// Feed interleaved samples; completed frames are appended to `out` as
    /// ready-to-send datagrams in block-index order.
    pub fn push(&mut self, samples: &[i16], out: &mut Vec<Vec<u8>>) {
        self.acc.extend_from_slice(samples);
        let frame_values = 2 * self.params.samples_per_frame();
        while self.acc.len() >= frame_values {
            let rest = self.acc.split_off(frame_values);
            let frame: Vec<i16> = std::mem::replace(&mut self.acc, rest);
            self.emit_frame(&frame, out);
        }
    }

    fn emit_frame(&mut self, samples: &[i16], out: &mut Vec<Vec<u8>>) {
        let mut meta = MetaData {
            center_freq_khz: self.params.center_freq_khz,
            sample_rate: self.params.sample_rate,
            sample_bytes: self.params.sample_bytes,
            sample_bits: self.params.sample_bits,
            data_blocks: DATA_BLOCKS as u8,
            fec_blocks: self.params.fec_blocks,
            ts_sec: 0,
            ts_usec: 0,
        };
        meta.timestamp_now();

        let mut bodies: Vec<Vec<u8>> = Vec::with_capacity(DATA_BLOCKS);
        bodies.push(meta.to_body());

        let values_per_block = 2 * self.params.samples_per_block();
        for block in 0..SAMPLE_BLOCKS {
            let src = &samples[block * values_per_block..(block + 1) * values_per_block];
            let mut body = vec![0u8; BODY_BYTES];
            match self.params.sample_bytes {
                1 => {
                    for (i, &v) in src.iter().enumerate() {
                        body[i] = (v >> 8) as u8;
                    }
                }
                _ => {
                    for (i, &v) in src.iter().enumerate() {
                        LittleEndian::write_i16(&mut body[i * 2..i * 2 + 2], v);
                    }
                }
            }
            bodies.push(body);
        }

        let parity = fec::encode(self.params.fec_blocks as usize, &bodies);

        for (idx, body) in bodies.iter().chain(parity.iter()).enumerate() {
            let mut dgram = vec![0u8; BLOCK_BYTES];
            BlockHeader {
                frame_index: self.frame_index,
                block_index: idx as u8,
            }
            .write_to(&mut dgram);
            dgram[crate::HEADER_BYTES..].copy_from_slice(body);
            out.push(dgram);
        }

        self.frame_index = self.frame_index.wrapping_add(1);
    }
}
