// Copyright 2025-2026 CEMAXECUTER LLC

//! Transmit-side frame unpacker: collects block datagrams into frames,
//! reconstructs losses through the erasure decoder and hands back the
//! sample stream in frame-index order. Unrecoverable frames are replaced
//! with silence of equal length so the time base is preserved.

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};

use crate::meta::MetaData;
use crate::{
    fec, BlockHeader, FrameError, DATA_BLOCKS, HEADER_BYTES, MAX_FEC_BLOCKS, SAMPLE_BLOCKS,
};

/// Frames tracked at once.
pub const FRAME_WINDOW: usize = 8;

/// 16-bit wraparound ordering: a is after b iff (a - b) mod 65536 in [1, 32768).
#[inline]
fn after(a: u16, b: u16) -> bool {
    let d = a.wrapping_sub(b);
    d >= 1 && d < 32768
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnpackerStats {
    pub frames_delivered: u64,
    pub frames_lost: u64,
    pub crc_failures: u64,
    pub protocol_errors: u64,
}

enum FrameState {
    Collecting,
    /// Recovered and expanded, waiting for its turn in index order.
    Ready(Vec<i16>),
    /// Recovered but meta check failed; delivered as silence.
    Failed,
}

struct PendingFrame {
    index: u16,
    slots: Vec<Option<Vec<u8>>>,
    present: usize,
    state: FrameState,
}

impl PendingFrame {
    fn new(index: u16) -> Self {
        Self {
            index,
            slots: vec![None; DATA_BLOCKS + MAX_FEC_BLOCKS],
            present: 0,
            state: FrameState::Collecting,
        }
    }
}

pub struct FrameUnpacker {
    window: VecDeque<PendingFrame>,
    decoder: fec::Decoder,
    /// Index the next delivered frame should carry; earlier gaps are
    /// zero-filled.
    next_expected: Option<u16>,
    /// Silence length for a lost frame, from the last good meta.
    silence_samples: usize,
    stats: UnpackerStats,
}

impl Default for FrameUnpacker {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameUnpacker {
    pub fn new() -> Self {
        Self {
            window: VecDeque::new(),
            decoder: fec::Decoder::new(),
            next_expected: None,
            silence_samples: SAMPLE_BLOCKS * 127,
            stats: UnpackerStats::default(),
        }
    }

    pub fn stats(&self) -> UnpackerStats {
        self.stats
    }

    /// Feed one received datagram; any samples that became deliverable are
    /// appended to `out` as interleaved i16 I/Q pairs.
    pub fn push_datagram(&mut self, dgram: &[u8], out: &mut Vec<i16>) {
        let hdr = match BlockHeader::parse(dgram) {
            Ok(hdr) => hdr,
            Err(err) => {
                self.stats.protocol_errors += 1;
                log::debug!("dropping datagram: {}", err);
                return;
            }
        };

        let Some(pos) = self.slot_position(hdr.frame_index, out) else {
            return; // late block for an already closed frame
        };

        {
            let frame = &mut self.window[pos];
            let slot = &mut frame.slots[hdr.block_index as usize];
            if slot.is_none() {
                *slot = Some(dgram[HEADER_BYTES..].to_vec());
                frame.present += 1;
            }
        }

        self.try_recover(pos);
        self.drain_in_order(out);
    }

    /// Find or create the window entry for `index`, keeping the deque in
    /// ascending modular order and enforcing the window bounds.
    fn slot_position(&mut self, index: u16, out: &mut Vec<i16>) -> Option<usize> {
        if let Some(pos) = self.window.iter().position(|f| f.index == index) {
            return Some(pos);
        }
        if let Some(exp) = self.next_expected {
            if !after(index, exp) && index != exp {
                let behind = exp.wrapping_sub(index) as usize;
                if behind <= 2 * FRAME_WINDOW {
                    return None; // late block for an already closed frame
                }
                // wildly off the delivery cursor: the sender restarted;
                // flush what we have and start over at the new position
                log::warn!(
                    "frame index jumped backward from {} to {}, restarting stream",
                    exp,
                    index
                );
                while !self.window.is_empty() {
                    self.close_front(out);
                }
                self.next_expected = None;
            }
        }

        let insert_at = self
            .window
            .iter()
            .position(|f| after(f.index, index))
            .unwrap_or(self.window.len());
        self.window.insert(insert_at, PendingFrame::new(index));

        // Bound the window: never more than FRAME_WINDOW frames, and never a
        // span wider than half the window ahead of the oldest.
        loop {
            let too_many = self.window.len() > FRAME_WINDOW;
            let span = self
                .window
                .back()
                .map(|b| b.index.wrapping_sub(self.window[0].index) as usize)
                .unwrap_or(0);
            if !too_many && span <= FRAME_WINDOW / 2 {
                break;
            }
            self.close_front(out);
        }

        self.window.iter().position(|f| f.index == index)
    }

    /// Run the erasure decoder once enough distinct blocks arrived.
    fn try_recover(&mut self, pos: usize) {
        let frame = &mut self.window[pos];
        if !matches!(frame.state, FrameState::Collecting) || frame.present < DATA_BLOCKS {
            return;
        }
        if self.decoder.decode(&mut frame.slots).is_err() {
            return;
        }
        let frame = &mut self.window[pos];
        match MetaData::from_body(frame.slots[0].as_deref().unwrap_or(&[])) {
            Ok(meta) => {
                let samples = expand_samples(&meta, &frame.slots);
                self.silence_samples = meta.samples_per_frame();
                frame.state = FrameState::Ready(samples);
            }
            Err(FrameError::Crc) => {
                self.stats.crc_failures += 1;
                log::warn!("frame {}: meta CRC mismatch, dropping", frame.index);
                frame.state = FrameState::Failed;
            }
            Err(err) => {
                self.stats.protocol_errors += 1;
                log::warn!("frame {}: {}", frame.index, err);
                frame.state = FrameState::Failed;
            }
        }
    }

    /// Deliver finished frames from the head, but only while they are next
    /// in sequence; a gap waits for its frame until window pressure evicts
    /// the head.
    fn drain_in_order(&mut self, out: &mut Vec<i16>) {
        loop {
            let Some(front) = self.window.front() else {
                break;
            };
            let finished = matches!(front.state, FrameState::Ready(_) | FrameState::Failed);
            let in_sequence = match self.next_expected {
                None => true,
                Some(exp) => front.index == exp,
            };
            if !(finished && in_sequence) {
                break;
            }
            self.close_front(out);
        }
    }

    /// Pop the oldest frame and emit it: payload when recovered, silence
    /// otherwise. Wholly missing frame indices before it are zero-filled.
    fn close_front(&mut self, out: &mut Vec<i16>) {
        let Some(mut frame) = self.window.pop_front() else {
            return;
        };

        if let Some(exp) = self.next_expected {
            let gap = frame.index.wrapping_sub(exp);
            if gap > 0 && gap < 32768 {
                log::warn!("frames {}..{} never arrived, zero-filling", exp, frame.index);
                self.stats.frames_lost += gap as u64;
                // bound the fill so a forward index jump cannot balloon the
                // output; the time base is already gone at that point
                self.push_silence((gap as usize).min(4 * FRAME_WINDOW), out);
            }
        }
        self.next_expected = Some(frame.index.wrapping_add(1));

        // A frame evicted while still collecting gets one last chance: with
        // 128 distinct blocks it decodes, otherwise the decoder reports the
        // shortfall and the frame is written off.
        if matches!(frame.state, FrameState::Collecting) {
            match self.decoder.decode(&mut frame.slots) {
                Ok(()) => match MetaData::from_body(frame.slots[0].as_deref().unwrap_or(&[])) {
                    Ok(meta) => {
                        self.silence_samples = meta.samples_per_frame();
                        frame.state = FrameState::Ready(expand_samples(&meta, &frame.slots));
                    }
                    Err(FrameError::Crc) => {
                        self.stats.crc_failures += 1;
                        log::warn!("frame {}: meta CRC mismatch, dropping", frame.index);
                        frame.state = FrameState::Failed;
                    }
                    Err(err) => {
                        self.stats.protocol_errors += 1;
                        log::warn!("frame {}: {}", frame.index, err);
                        frame.state = FrameState::Failed;
                    }
                },
                Err(err) => {
                    self.stats.frames_lost += 1;
                    log::warn!("frame {} dropped: {}", frame.index, err);
                    frame.state = FrameState::Failed;
                }
            }
        }

        match frame.state {
            FrameState::Ready(samples) => {
                self.stats.frames_delivered += 1;
                out.extend_from_slice(&samples);
            }
            _ => self.push_silence(1, out),
        }
    }

    fn push_silence(&self, frames: usize, out: &mut Vec<i16>) {
        out.extend(std::iter::repeat(0i16).take(2 * self.silence_samples * frames));
    }
}

fn expand_samples(meta: &MetaData, slots: &[Option<Vec<u8>>]) -> Vec<i16> {
    let values_per_block = 2 * meta.samples_per_block();
    let mut samples = Vec::with_capacity(SAMPLE_BLOCKS * values_per_block);
    for slot in slots.iter().take(DATA_BLOCKS).skip(1) {
        let body = slot.as_deref().unwrap_or(&[]);
        match meta.sample_bytes {
            1 => {
                for &b in body.iter().take(values_per_block) {
                    samples.push(((b as i8) as i16) << 8);
                }
            }
            _ => {
                for i in 0..values_per_block {
                    samples.push(LittleEndian::read_i16(&body[2 * i..2 * i + 2]));
                }
            }
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::{FramePacker, StreamParams};

    fn params(fec_blocks: u8) -> StreamParams {
        StreamParams {
            center_freq_khz: 433_970,
            sample_rate: 250_000,
            sample_bytes: 2,
            sample_bits: 16,
            fec_blocks,
        }
    }

    fn frame_samples(seed: i16) -> Vec<i16> {
        (0..2 * 127 * 127)
            .map(|i| (seed as i32 * 7 + i as i32 % 251) as i16)
            .collect()
    }

    /// Pack `n` consecutive frames, returning per-frame datagram vectors.
    fn pack_frames(fec_blocks: u8, n: usize) -> (Vec<Vec<Vec<u8>>>, Vec<Vec<i16>>) {
        let mut packer = FramePacker::new(params(fec_blocks));
        let mut frames = Vec::new();
        let mut payloads = Vec::new();
        for f in 0..n {
            let samples = frame_samples(f as i16);
            let mut out = Vec::new();
            packer.push(&samples, &mut out);
            assert_eq!(out.len(), DATA_BLOCKS + fec_blocks as usize);
            frames.push(out);
            payloads.push(samples);
        }
        (frames, payloads)
    }

    fn set_frame_index(dgram: &mut [u8], index: u16) {
        dgram[0] = (index & 0xFF) as u8;
        dgram[1] = (index >> 8) as u8;
    }

    #[test]
    fn test_lossless_roundtrip() {
        let (frames, payloads) = pack_frames(0, 3);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for frame in &frames {
            for dgram in frame {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        let expect: Vec<i16> = payloads.concat();
        assert_eq!(out, expect);
        assert_eq!(unpacker.stats().frames_delivered, 3);
        assert_eq!(unpacker.stats().frames_lost, 0);
    }

    #[test]
    fn test_reordered_blocks_within_frames() {
        let (frames, payloads) = pack_frames(4, 3);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for frame in &frames {
            for dgram in frame.iter().rev() {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        assert_eq!(out, payloads.concat());
    }

    #[test]
    fn test_recovery_from_mixed_losses() {
        // scenario: fecblk=8, drop 8 blocks across data and parity
        let (frames, payloads) = pack_frames(8, 1);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        let drop = [3usize, 17, 45, 80, 100, 130, 131, 132];
        for (i, dgram) in frames[0].iter().enumerate() {
            if !drop.contains(&i) {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        assert_eq!(out, payloads[0]);
        assert_eq!(unpacker.stats().frames_delivered, 1);
    }

    #[test]
    fn test_unrecoverable_frame_padded_with_silence() {
        // scenario: fecblk=2, drop 3 data blocks; frame is written off when
        // the window advances past it
        let (frames, payloads) = pack_frames(2, 6);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for (i, dgram) in frames[0].iter().enumerate() {
            if ![5usize, 6, 7].contains(&i) {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        assert!(out.is_empty());
        for frame in &frames[1..] {
            for dgram in frame {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        assert_eq!(unpacker.stats().frames_lost, 1);
        let mut expect = vec![0i16; 2 * 127 * 127];
        for payload in &payloads[1..] {
            expect.extend_from_slice(payload);
        }
        assert_eq!(out, expect);
    }

    #[test]
    fn test_wholly_missing_frame_zero_filled() {
        let (frames, payloads) = pack_frames(0, 8);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        // frame 1 vanishes entirely; its slot is zero-filled once the
        // window has advanced past it
        for (i, frame) in frames.iter().enumerate() {
            if i == 1 {
                continue;
            }
            for dgram in frame {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        assert_eq!(unpacker.stats().frames_lost, 1);
        assert_eq!(unpacker.stats().frames_delivered, 7);
        let mut expect = payloads[0].clone();
        expect.extend(vec![0i16; 2 * 127 * 127]);
        for payload in &payloads[2..] {
            expect.extend_from_slice(payload);
        }
        assert_eq!(out, expect);
    }

    #[test]
    fn test_meta_corruption_detected_after_recovery() {
        let (mut frames, _) = pack_frames(2, 1);
        // flip one bit inside the CRC-covered span of the meta body,
        // keep every block
        frames[0][0][HEADER_BYTES + 2] ^= 0x10;
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for dgram in &frames[0] {
            unpacker.push_datagram(dgram, &mut out);
        }
        assert_eq!(unpacker.stats().crc_failures, 1);
        // silence in place of the damaged frame
        assert_eq!(out, vec![0i16; 2 * 127 * 127]);
    }

    #[test]
    fn test_frame_index_wraparound() {
        let (mut frames, payloads) = pack_frames(0, 4);
        let indices = [65534u16, 65535, 0, 1];
        for (frame, &idx) in frames.iter_mut().zip(&indices) {
            for dgram in frame.iter_mut() {
                set_frame_index(dgram, idx);
            }
        }
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for frame in &frames {
            for dgram in frame {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        assert_eq!(out, payloads.concat());
        assert_eq!(unpacker.stats().frames_delivered, 4);
        assert_eq!(unpacker.stats().frames_lost, 0);
    }

    #[test]
    fn test_short_datagram_counted_and_dropped() {
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        unpacker.push_datagram(&[0u8; 100], &mut out);
        assert!(out.is_empty());
        assert_eq!(unpacker.stats().protocol_errors, 1);
    }

    #[test]
    fn test_late_frame_slots_in_before_newer_one() {
        // frame 1's blocks arrive after frame 2's; output order must still
        // follow the frame index
        let (frames, payloads) = pack_frames(0, 3);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for dgram in &frames[0] {
            unpacker.push_datagram(dgram, &mut out);
        }
        for dgram in &frames[2] {
            unpacker.push_datagram(dgram, &mut out);
        }
        // frame 2 is complete but held: frame 1 is still expected
        assert_eq!(out, payloads[0]);
        for dgram in &frames[1] {
            unpacker.push_datagram(dgram, &mut out);
        }
        assert_eq!(out, payloads[..].concat());
        assert_eq!(unpacker.stats().frames_lost, 0);
    }

    #[test]
    fn test_stale_block_ignored_after_delivery() {
        let (frames, payloads) = pack_frames(0, 2);
        let mut unpacker = FrameUnpacker::new();
        let mut out = Vec::new();
        for frame in &frames {
            for dgram in frame {
                unpacker.push_datagram(dgram, &mut out);
            }
        }
        // duplicate of an already delivered frame's block must not reopen it
        unpacker.push_datagram(&frames[0][1], &mut out);
        assert_eq!(out, payloads.concat());
        assert_eq!(unpacker.stats().frames_delivered, 2);
    }
}
