// Copyright 2025-2026 CEMAXECUTER LLC

//! Cauchy-MDS block erasure code over GF(2^8).
//!
//! Fixed geometry: k = 128 data blocks per frame, m = 0..127 parity blocks,
//! all bodies 508 bytes. The generator matrix is the identity stacked on a
//! Cauchy matrix with x_i = 128 + i (parity rows) and y_j = j (data
//! columns); x and y never collide, so every entry 1/(x_i ^ y_j) exists and
//! every square submatrix is invertible. Any 128 distinct blocks of a frame
//! therefore recover all 128 data blocks.

use std::collections::HashMap;

use crate::gf256;
use crate::{FecError, BODY_BYTES, DATA_BLOCKS, MAX_FEC_BLOCKS};

/// Cauchy coefficient applied to data column `col` when building parity row
/// `row`.
#[inline]
pub fn coefficient(row: usize, col: usize) -> u8 {
    debug_assert!(row < MAX_FEC_BLOCKS && col < DATA_BLOCKS);
    gf256::inv((DATA_BLOCKS + row) as u8 ^ col as u8)
}

/// Compute `fec_blocks` parity bodies over the 128 data-block bodies.
pub fn encode(fec_blocks: usize, data: &[Vec<u8>]) -> Vec<Vec<u8>> {
    assert_eq!(data.len(), DATA_BLOCKS);
    assert!(fec_blocks <= MAX_FEC_BLOCKS);

    let mut parity = Vec::with_capacity(fec_blocks);
    for row in 0..fec_blocks {
        let mut body = vec![0u8; BODY_BYTES];
        for (col, block) in data.iter().enumerate() {
            gf256::mul_add_slice(&mut body, block, coefficient(row, col));
        }
        parity.push(body);
    }
    parity
}

/// Presence bitmask over the 8-bit block-index space; the decoder's cache
/// key. The matrix to invert is fully determined by which slots are filled.
type PresenceMask = [u64; 4];

fn presence_mask(slots: &[Option<Vec<u8>>]) -> PresenceMask {
    let mut mask = [0u64; 4];
    for (idx, slot) in slots.iter().enumerate() {
        if slot.is_some() {
            mask[idx / 64] |= 1 << (idx % 64);
        }
    }
    mask
}

/// Erasure decoder with a lazily built inverse per loss pattern.
///
/// Streams tend to repeat the same loss pattern for many consecutive frames
/// (a congested path drops the tail of every burst), so the Gaussian
/// elimination is cached keyed by the presence mask.
pub struct Decoder {
    inverses: HashMap<PresenceMask, Vec<u8>>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self { inverses: HashMap::new() }
    }

    /// Reconstruct the missing data bodies in `slots`, indexed by original
    /// block index (data 0..128, parity 128..). Parity slots are left
    /// untouched. Fails when fewer than 128 distinct blocks are present.
    pub fn decode(&mut self, slots: &mut [Option<Vec<u8>>]) -> Result<(), FecError> {
        let erased: Vec<usize> = (0..DATA_BLOCKS)
            .filter(|&i| slots[i].is_none())
            .collect();
        if erased.is_empty() {
            return Ok(());
        }

        let present = slots.iter().filter(|s| s.is_some()).count();
        if present < DATA_BLOCKS {
            return Err(FecError::InsufficientBlocks { present });
        }

        let parity_rows: Vec<usize> = (DATA_BLOCKS..slots.len())
            .filter(|&i| slots[i].is_some())
            .map(|i| i - DATA_BLOCKS)
            .take(erased.len())
            .collect();

        let mask = presence_mask(slots);
        if self.inverses.len() > 64 {
            self.inverses.clear();
        }
        let inverse = self
            .inverses
            .entry(mask)
            .or_insert_with(|| invert_submatrix(&parity_rows, &erased));

        // rhs_r = parity_r ^ sum over present data columns; what remains is
        // the parity row restricted to the erased columns.
        let e = erased.len();
        let mut rhs: Vec<Vec<u8>> = Vec::with_capacity(e);
        for &row in &parity_rows {
            let mut body = slots[DATA_BLOCKS + row]
                .as_ref()
                .cloned()
                .unwrap_or_else(|| vec![0u8; BODY_BYTES]);
            for col in 0..DATA_BLOCKS {
                if let Some(block) = &slots[col] {
                    gf256::mul_add_slice(&mut body, block, coefficient(row, col));
                }
            }
            rhs.push(body);
        }

        for (c, &col) in erased.iter().enumerate() {
            let mut body = vec![0u8; BODY_BYTES];
            for (r, rhs_body) in rhs.iter().enumerate() {
                gf256::mul_add_slice(&mut body, rhs_body, inverse[c * e + r]);
            }
            slots[col] = Some(body);
        }
        Ok(())
    }
}

/// Invert the e-by-e Cauchy submatrix selected by the available parity rows
/// and the erased data columns. Gauss-Jordan with the identity augmented;
/// a pivot always exists because Cauchy submatrices are nonsingular.
fn invert_submatrix(parity_rows: &[usize], erased: &[usize]) -> Vec<u8> {
    let e = erased.len();
    let mut a = vec![0u8; e * e];
    let mut inv = vec![0u8; e * e];
    for r in 0..e {
        for c in 0..e {
            a[r * e + c] = coefficient(parity_rows[r], erased[c]);
        }
        inv[r * e + r] = 1;
    }

    for col in 0..e {
        let pivot = (col..e)
            .find(|&r| a[r * e + col] != 0)
            .expect("Cauchy submatrix is nonsingular");
        if pivot != col {
            for j in 0..e {
                a.swap(col * e + j, pivot * e + j);
                inv.swap(col * e + j, pivot * e + j);
            }
        }

        let scale = gf256::inv(a[col * e + col]);
        gf256::scale_slice(&mut a[col * e..(col + 1) * e], scale);
        gf256::scale_slice(&mut inv[col * e..(col + 1) * e], scale);

        for r in 0..e {
            if r == col {
                continue;
            }
            let factor = a[r * e + col];
            if factor == 0 {
                continue;
            }
            for j in 0..e {
                let t = gf256::mul(factor, a[col * e + j]);
                a[r * e + j] ^= t;
                let t = gf256::mul(factor, inv[col * e + j]);
                inv[r * e + j] ^= t;
            }
        }
    }
    inv
}
