//! Halfband kernel design.
//!
//! The only filter this crate needs is the symmetric halfband arm, so the
//! Kaiser shaping is folded straight into its derivation: the ideal
//! sin(pi d / 2) / (pi d) arm is evaluated at the odd offsets, tapered by
//! the Kaiser bell at the same distance, quantized to Q15 and pinned to an
//! exact DC sum.

use std::f64::consts::PI;

/// Zeroth-order modified Bessel function, the Kaiser bell's kernel.
/// Power series, summed until the next term stops mattering.
fn bessel_i0(x: f64) -> f64 {
    let q = x * x * 0.25;
    let mut term = 1.0;
    let mut acc = 1.0;
    let mut k = 1.0;
    loop {
        term *= q / (k * k);
        acc += term;
        if term < acc * 1e-14 {
            return acc;
        }
        k += 1.0;
    }
}

/// Design one polyphase arm of a halfband lowpass in Q15.
///
/// The full kernel has 4*`side_taps` - 1 coefficients: a 0.5 center tap,
/// zeros at the remaining even offsets, and a symmetric arm at the odd
/// offsets. Only the arm is returned: entry r is the tap at distance 2r+1
/// from the center. The quantized taps are adjusted so that twice their sum
/// is exactly 16384 (0.5 in Q15), making the fixed-point DC gain exactly
/// unity.
pub fn halfband_arm_q15(side_taps: usize, att_db: f64) -> Vec<i16> {
    // Kaiser shape parameter for the requested stopband depth; below the
    // 21 dB knee a rectangular window already does it
    let beta = if att_db > 50.0 {
        0.1102 * (att_db - 8.7)
    } else if att_db > 21.0 {
        0.5842 * (att_db - 21.0).powf(0.4) + 0.07886 * (att_db - 21.0)
    } else {
        0.0
    };

    // center-to-edge distance of the full 4*side_taps - 1 tap kernel
    let edge = (2 * side_taps - 1) as f64;
    let norm = bessel_i0(beta);

    let mut arm: Vec<i16> = (0..side_taps)
        .map(|r| {
            let d = (2 * r + 1) as f64;
            let ideal = (PI * d / 2.0).sin() / (PI * d);
            let spread = d / edge;
            let taper = bessel_i0(beta * (1.0 - spread * spread).max(0.0).sqrt()) / norm;
            (ideal * taper * 32768.0).round() as i16
        })
        .collect();

    // force the exact DC constraint onto the largest tap
    let sum: i32 = arm.iter().map(|&c| c as i32).sum();
    arm[0] = (arm[0] as i32 + (8192 - sum)) as i16;
    arm
}
