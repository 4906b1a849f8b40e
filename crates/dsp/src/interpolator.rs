// Copyright 2025-2026 CEMAXECUTER LLC

//! Power-of-two interpolation chain for the transmit direction.
//!
//! Mirror of the decimator: one halfband stage per unit of log2 factor,
//! always centered (no band placement on transmit).

use crate::halfband::HalfbandInterp;
use crate::window::halfband_arm_q15;
use crate::MAX_LOG2_FACTOR;

const SIDE_TAPS: usize = 20;
const STOP_ATT_DB: f64 = 90.0;

pub struct Interpolator {
    log2_interp: u32,
    stages: Vec<HalfbandInterp>,
}

impl Interpolator {
    pub fn new(log2_interp: u32) -> Self {
        let mut i = Self { log2_interp: 0, stages: Vec::new() };
        i.configure(log2_interp);
        i
    }

    /// Change the interpolation factor, dropping all stage state.
    pub fn configure(&mut self, log2_interp: u32) {
        let log2_interp = log2_interp.min(MAX_LOG2_FACTOR);
        self.log2_interp = log2_interp;
        let arm = halfband_arm_q15(SIDE_TAPS, STOP_ATT_DB);
        self.stages = (0..log2_interp)
            .map(|_| HalfbandInterp::new(arm.clone()))
            .collect();
    }

    pub fn log2_interp(&self) -> u32 {
        self.log2_interp
    }

    /// Upsample one interleaved IQ vector; output length is exactly
    /// len << log2_interp.
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        if self.log2_interp == 0 {
            out.extend_from_slice(input);
            return;
        }

        let mut front = input.to_vec();
        let mut swap = Vec::with_capacity(front.len() * 2);
        for stage in &mut self.stages {
            swap.clear();
            stage.process(&front, &mut swap);
            std::mem::swap(&mut front, &mut swap);
        }
        out.extend_from_slice(&front);
    }
}
