//! Mer encoding: 2-bit mapping, reverse complement, canonicalization.
//!
//! Conventions
//! - Codes are **LSB-aligned**: a `k`-mer occupies the lower `2k` bits.
//! - The first base of the window is the most significant pair.
//! - A=00, C=01, G=10, T=11, so complementing a base is `x ^ 0b11`.

use crate::bits::{mask, reverse_bit_pairs};

/// 256-entry LUT: ASCII → 2-bit (A=0, C=1, G=2, T/U=3), 0xFF for ambiguous.
pub static MAP_LUT: [u8; 256] = {
    const X: u8 = 0xFF;
    let mut t = [X; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t[b'U' as usize] = 3;
    t[b'u' as usize] = 3;
    t
};

const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

/// 2-bit encoding via LUT. `None` if ambiguous.
#[inline]
pub fn map_base(b: u8) -> Option<u8> {
    let v = MAP_LUT[b as usize];
    if v <= 3 { Some(v) } else { None }
}

/// Mask covering the `2k` bits of a `k`-mer.
#[inline]
pub fn mer_mask(k: usize) -> u64 {
    mask(2 * k as u32)
}

/// Encode a k-mer window. `None` if `k` is outside `1..=32` or a base is ambiguous.
#[inline]
pub fn encode_kmer(window: &[u8]) -> Option<u64> {
    let k = window.len();
    if k == 0 || k > 32 {
        return None;
    }
    let mut code: u64 = 0;
    for &b in window {
        let v = map_base(b)? as u64;
        code = (code << 2) | v;
    }
    Some(code)
}

/// Decode the lower `2k` bits of `code` back into bases.
pub fn decode_kmer(code: u64, k: usize) -> String {
    (0..k)
        .rev()
        .map(|i| BASES[((code >> (2 * i)) & 0b11) as usize])
        .collect()
}

/// Reverse-complement a code (lower `2k` bits used).
#[inline]
pub fn revcomp(code: u64, k: usize) -> u64 {
    debug_assert!((1..=32).contains(&k));
    reverse_bit_pairs(!code) >> (64 - 2 * k as u32)
}

/// The numerically smaller of `code` and its reverse complement.
#[inline]
pub fn canonical(code: u64, k: usize) -> u64 {
    code.min(revcomp(code, k))
}
