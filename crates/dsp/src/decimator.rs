// Copyright 2025-2026 CEMAXECUTER LLC

//! Power-of-two decimation chain with tuned-frequency placement.
//!
//! The chain is a cascade of identical halfband stages, one per unit of the
//! log2 factor. For infra/supra placement the input is first translated by
//! -Fs/4 or +Fs/4 with the exact four-phase mixer (multiplications by
//! {1, -j, -1, j} only), so the tuned RF ends up at -Fs_out/4 or +Fs_out/4
//! of the decimated band.

use crate::halfband::HalfbandDecim;
use crate::window::halfband_arm_q15;
use crate::{FcPos, MAX_LOG2_FACTOR};

/// Halfband arm length used by every stage.
const SIDE_TAPS: usize = 20;
/// Design stopband attenuation, dB.
const STOP_ATT_DB: f64 = 90.0;

pub struct Decimator {
    log2_decim: u32,
    fc_pos: FcPos,
    mixer_phase: u8,
    stages: Vec<HalfbandDecim>,
}

impl Decimator {
    pub fn new(log2_decim: u32, fc_pos: FcPos) -> Self {
        let mut d = Self {
            log2_decim: 0,
            fc_pos: FcPos::Center,
            mixer_phase: 0,
            stages: Vec::new(),
        };
        d.configure(log2_decim, fc_pos);
        d
    }

    /// Change the decimation factor or placement. All stage state is
    /// dropped; samples still inside the chain are flushed without emission.
    pub fn configure(&mut self, log2_decim: u32, fc_pos: FcPos) {
        let log2_decim = log2_decim.min(MAX_LOG2_FACTOR);
        self.log2_decim = log2_decim;
        self.fc_pos = fc_pos;
        self.mixer_phase = 0;
        let arm = halfband_arm_q15(SIDE_TAPS, STOP_ATT_DB);
        self.stages = (0..log2_decim)
            .map(|_| HalfbandDecim::new(arm.clone()))
            .collect();
    }

    pub fn log2_decim(&self) -> u32 {
        self.log2_decim
    }

    /// Decimate one interleaved IQ vector; output length is
    /// len >> log2_decim for input lengths divisible by the factor
    /// (remainders carry over to the next call).
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        if self.log2_decim == 0 {
            out.extend_from_slice(input);
            return;
        }

        let mut front: Vec<i16> = match self.fc_pos {
            FcPos::Center => input.to_vec(),
            _ => self.mix_fs4(input),
        };

        let mut swap = Vec::with_capacity(front.len() / 2);
        for stage in &mut self.stages {
            swap.clear();
            stage.process(&front, &mut swap);
            std::mem::swap(&mut front, &mut swap);
        }
        out.extend_from_slice(&front);
    }

    /// Exact Fs/4 translation: cycles {(I,Q), (Q,-I), (-I,-Q), (-Q,I)} for
    /// -Fs/4 (infra) and the reverse rotation for +Fs/4 (supra).
    fn mix_fs4(&mut self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity(input.len());
        let supra = self.fc_pos == FcPos::Supra;
        for pair in input.chunks_exact(2) {
            let (i, q) = (pair[0], pair[1]);
            let phase = if supra {
                (4 - self.mixer_phase) & 3
            } else {
                self.mixer_phase
            };
            let (mi, mq) = match phase {
                0 => (i, q),
                1 => (q, i.saturating_neg()),
                2 => (i.saturating_neg(), q.saturating_neg()),
                _ => (q.saturating_neg(), i),
            };
            out.push(mi);
            out.push(mq);
            self.mixer_phase = (self.mixer_phase + 1) & 3;
        }
        out
    }
}
