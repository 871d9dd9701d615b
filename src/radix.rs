//! In-place LSD radix sort for `u64` keys with a paired values array.
//! 8-bit passes, only as many as `key_bits` requires. Stable via counting + prefix sums.

/// Sort `keys` ascending by their low `key_bits` bits and permute `vals` accordingly.
/// Equal keys keep their relative order.
pub fn radix_sort_pairs_u64<V: Copy + Default>(keys: &mut [u64], vals: &mut [V], key_bits: u32) {
    debug_assert_eq!(keys.len(), vals.len());
    let n = keys.len();
    if n <= 1 {
        return;
    }

    let mut tmp_keys = vec![0u64; n];
    let mut tmp_vals = vec![V::default(); n];

    let passes = key_bits.div_ceil(8).clamp(1, 8);
    for pass in 0..passes {
        let shift = pass * 8;
        let mut counts = [0usize; 256];

        for &k in keys.iter() {
            counts[((k >> shift) & 0xFF) as usize] += 1;
        }
        // single bucket: this byte is constant, nothing moves
        if counts.iter().any(|&c| c == n) {
            continue;
        }

        let mut sum = 0usize;
        for c in counts.iter_mut() {
            let tmp = *c;
            *c = sum;
            sum += tmp;
        }

        for i in 0..n {
            let k = keys[i];
            let b = ((k >> shift) & 0xFF) as usize;
            let pos = counts[b];
            tmp_keys[pos] = k;
            tmp_vals[pos] = vals[i];
            counts[b] = pos + 1;
        }

        keys.copy_from_slice(&tmp_keys);
        vals.copy_from_slice(&tmp_vals);
    }
}

/// Sort parallel `(check, value)` arrays lexicographically.
pub fn sort_check_value_pairs(
    checks: &mut [u64],
    vals: &mut [u64],
    check_bits: u32,
    value_bits: u32,
) {
    radix_sort_pairs_u64(vals, checks, value_bits);
    radix_sort_pairs_u64(checks, vals, check_bits);
}
