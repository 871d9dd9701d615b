//! Variable-width integer packing into `u64` word arrays, plus the few bit
//! tricks the tables need (width computation, base distance, pair reversal).
//!
//! Fields are addressed by absolute bit offset and may straddle one word
//! boundary. Bit `i` of the array is bit `i % 64` of word `i / 64`.

const PAIR_LO: u64 = 0x5555_5555_5555_5555;
const PAIR_2: u64 = 0x3333_3333_3333_3333;
const NIBBLE: u64 = 0x0f0f_0f0f_0f0f_0f0f;

/// Low `width` bits set. `mask(64) == u64::MAX`, `mask(0) == 0`.
#[inline]
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Number of words needed to hold `bits` bits.
#[inline]
pub fn words_for_bits(bits: u64) -> usize {
    bits.div_ceil(64) as usize
}

#[inline]
fn check_width(width: u32) {
    assert!(
        (1..=64).contains(&width),
        "bit field width must be 1..=64, got {width}"
    );
}

/// Read `width` bits starting at `bit_offset`.
///
/// # Panics
/// If `width` is 0 or larger than 64, or the field lies outside `words`.
#[inline]
pub fn get_value(words: &[u64], bit_offset: u64, width: u32) -> u64 {
    check_width(width);
    let w = (bit_offset >> 6) as usize;
    let b = (bit_offset & 63) as u32;
    let lo = words[w] >> b;
    if b + width <= 64 {
        lo & mask(width)
    } else {
        (lo | (words[w + 1] << (64 - b))) & mask(width)
    }
}

/// Write the low `width` bits of `value` at `bit_offset`, leaving every other
/// bit of the touched words untouched.
///
/// # Panics
/// If `width` is 0 or larger than 64, or the field lies outside `words`.
#[inline]
pub fn set_value(words: &mut [u64], bit_offset: u64, width: u32, value: u64) {
    check_width(width);
    let value = value & mask(width);
    let w = (bit_offset >> 6) as usize;
    let b = (bit_offset & 63) as u32;
    if b + width <= 64 {
        let m = mask(width) << b;
        words[w] = (words[w] & !m) | (value << b);
    } else {
        let lo_bits = 64 - b;
        let m_lo = u64::MAX << b;
        words[w] = (words[w] & !m_lo) | (value << b);
        let m_hi = mask(width - lo_bits);
        words[w + 1] = (words[w + 1] & !m_hi) | (value >> lo_bits);
    }
}

/// Decode consecutive fields of the given widths into `out`.
/// Returns the bit offset just past the last field.
pub fn get_values(words: &[u64], bit_offset: u64, widths: &[u32], out: &mut [u64]) -> u64 {
    debug_assert!(out.len() >= widths.len());
    let mut pos = bit_offset;
    for (slot, &w) in out.iter_mut().zip(widths) {
        *slot = get_value(words, pos, w);
        pos += w as u64;
    }
    pos
}

/// Encode consecutive fields of the given widths.
/// Returns the bit offset just past the last field.
pub fn set_values(words: &mut [u64], bit_offset: u64, widths: &[u32], values: &[u64]) -> u64 {
    debug_assert!(values.len() >= widths.len());
    let mut pos = bit_offset;
    for (&v, &w) in values.iter().zip(widths) {
        set_value(words, pos, w, v);
        pos += w as u64;
    }
    pos
}

/// Number of bits needed to represent `x` (0 for 0).
///
/// Smears the highest set bit downwards, then counts the ones.
#[inline]
pub fn log_base_two(mut x: u64) -> u32 {
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x |= x >> 32;
    x.count_ones()
}

/// Number of differing bases between two 2-bit encoded mers.
///
/// Each two-bit pair is folded onto its low bit before counting, so a base
/// that differs in both bits counts once.
#[inline]
pub fn base_differences(a: u64, b: u64) -> u32 {
    let x = a ^ b;
    ((x | (x >> 1)) & PAIR_LO).count_ones()
}

/// Reverse the order of the 32 two-bit groups of a word.
#[inline]
pub fn reverse_bit_pairs(mut x: u64) -> u64 {
    x = ((x >> 2) & PAIR_2) | ((x & PAIR_2) << 2);
    x = ((x >> 4) & NIBBLE) | ((x & NIBBLE) << 4);
    x.swap_bytes()
}
