// Copyright 2025-2026 CEMAXECUTER LLC

//! Fixed-point halfband stages, one per unit of log2 rate change.
//!
//! Both directions use the same Q15 arm from `window::halfband_arm_q15`:
//! the decimating stage computes every other output of the symmetric
//! kernel, the interpolating stage zero-stuffs and splits the kernel into
//! its trivial center phase and the arm phase with a 2x gain to compensate
//! the stuffing loss. Histories are primed with zeros, so a stage always
//! produces exactly len/2 (or 2*len) samples for even-length input.

use crate::clamp16;

/// Rounding constant for the Q15 accumulator.
const ROUND: i32 = 0x4000;
/// Center tap, 0.5 in Q15.
const CENTER: i32 = 16384;

/// Two-to-one halfband decimator stage.
pub struct HalfbandDecim {
    arm: Vec<i16>,
    buf_i: Vec<i16>,
    buf_q: Vec<i16>,
}

impl HalfbandDecim {
    pub fn new(arm: Vec<i16>) -> Self {
        // one short of a full kernel, and phased so that even-length input
        // always yields exactly half as many samples
        let hist = 4 * arm.len() - 3;
        Self {
            arm,
            buf_i: vec![0; hist],
            buf_q: vec![0; hist],
        }
    }

    pub fn reset(&mut self) {
        let hist = 4 * self.arm.len() - 3;
        self.buf_i.clear();
        self.buf_q.clear();
        self.buf_i.resize(hist, 0);
        self.buf_q.resize(hist, 0);
    }

    /// Consume interleaved IQ samples, append the decimated stream to `out`.
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        for pair in input.chunks_exact(2) {
            self.buf_i.push(pair[0]);
            self.buf_q.push(pair[1]);
        }

        let ntaps = 4 * self.arm.len() - 1;
        let center = 2 * self.arm.len() - 1;
        let mut s = 0;
        while s + ntaps <= self.buf_i.len() {
            let cpos = s + center;
            let mut acc_i = CENTER * self.buf_i[cpos] as i32 + ROUND;
            let mut acc_q = CENTER * self.buf_q[cpos] as i32 + ROUND;
            for (r, &c) in self.arm.iter().enumerate() {
                let d = 2 * r + 1;
                let c = c as i32;
                acc_i += c * (self.buf_i[cpos - d] as i32 + self.buf_i[cpos + d] as i32);
                acc_q += c * (self.buf_q[cpos - d] as i32 + self.buf_q[cpos + d] as i32);
            }
            out.push(clamp16(acc_i >> 15));
            out.push(clamp16(acc_q >> 15));
            s += 2;
        }
        self.buf_i.drain(..s);
        self.buf_q.drain(..s);
    }
}

/// One-to-two halfband interpolator stage.
pub struct HalfbandInterp {
    arm: Vec<i16>,
    buf_i: Vec<i16>,
    buf_q: Vec<i16>,
}

impl HalfbandInterp {
    pub fn new(arm: Vec<i16>) -> Self {
        let hist = 2 * arm.len() - 1;
        Self {
            arm,
            buf_i: vec![0; hist],
            buf_q: vec![0; hist],
        }
    }

    pub fn reset(&mut self) {
        let hist = 2 * self.arm.len() - 1;
        self.buf_i.clear();
        self.buf_q.clear();
        self.buf_i.resize(hist, 0);
        self.buf_q.resize(hist, 0);
    }

    /// Consume interleaved IQ samples, append the upsampled stream to `out`.
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        for pair in input.chunks_exact(2) {
            self.buf_i.push(pair[0]);
            self.buf_q.push(pair[1]);
        }

        let l = self.arm.len();
        let win = 2 * l;
        let mut pos = win;
        while pos <= self.buf_i.len() {
            let mut acc_i = ROUND;
            let mut acc_q = ROUND;
            for (r, &c) in self.arm.iter().enumerate() {
                let a = pos - l + r;
                let b = pos - 1 - l - r;
                // 2x to make up the zero-stuffing gain loss
                let c = 2 * c as i32;
                acc_i += c * (self.buf_i[a] as i32 + self.buf_i[b] as i32);
                acc_q += c * (self.buf_q[a] as i32 + self.buf_q[b] as i32);
            }
            out.push(clamp16(acc_i >> 15));
            out.push(clamp16(acc_q >> 15));
            // center phase: 2 * 0.5 * x = the delayed sample itself
            out.push(self.buf_i[pos - l]);
            out.push(self.buf_q[pos - l]);
            pos += 1;
        }

        let keep = win - 1;
        let consumed = self.buf_i.len() - keep;
        self.buf_i.drain(..consumed);
        self.buf_q.drain(..consumed);
    }
}
