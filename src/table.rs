//! Table geometry: how a mer splits into a bucket index and a check value.

use crate::bits::{log_base_two, mask};
use crate::error::{IndexError, Result};

/// Largest supported number of bucket-index bits.
pub const MAX_TABLE_BITS: u32 = 40;

/// Smallest table the automatic sizing will pick when the mer allows it.
const MIN_AUTO_TABLE_BITS: u32 = 16;

/// Split of a `2k`-bit mer into `table_bits` low bits (the bucket) and the
/// remaining high bits (the check value stored in the bucket record).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableGeometry {
    mer_size: u32,
    table_bits: u32,
}

impl TableGeometry {
    /// Validate and build a geometry for `mer_size` bases and `2^table_bits` buckets.
    pub fn new(mer_size: usize, table_bits: u32) -> Result<Self> {
        if mer_size == 0 || mer_size > 32 {
            return Err(IndexError::Config(format!(
                "mer size must be 1..=32, got {mer_size}"
            )));
        }
        let mer_bits = 2 * mer_size as u32;
        if table_bits == 0 || table_bits >= mer_bits {
            return Err(IndexError::Config(format!(
                "table bits must be 1..{mer_bits} for {mer_size}-mers, got {table_bits}"
            )));
        }
        if table_bits > MAX_TABLE_BITS {
            return Err(IndexError::Config(format!(
                "table bits {table_bits} exceeds the maximum of {MAX_TABLE_BITS}"
            )));
        }
        Ok(Self {
            mer_size: mer_size as u32,
            table_bits,
        })
    }

    /// Pick the table size with the smallest expected footprint for about
    /// `approx_mers` mers.
    ///
    /// Candidates run from the smallest table whose records still fit a
    /// 64-bit word up to `2k - 4` bits. With `max_mismatch > 0` the expected
    /// number of records scanned per mismatch lookup decides instead of
    /// memory. `max_memory_mb == 0` means unlimited.
    pub fn auto(
        mer_size: usize,
        approx_mers: u64,
        max_memory_mb: u64,
        max_mismatch: u32,
    ) -> Result<Self> {
        if mer_size == 0 || mer_size > 32 {
            return Err(IndexError::Config(format!(
                "mer size must be 1..=32, got {mer_size}"
            )));
        }
        let mer_bits = 2 * mer_size as u64;
        let posn_width = log_base_two(approx_mers + 1) as u64;

        let hi = if mer_bits > 4 { mer_bits - 4 } else { mer_bits - 1 };
        let hi = hi.min(MAX_TABLE_BITS as u64);
        let raw_lo = (mer_bits + posn_width + 1).saturating_sub(64).max(1);
        if raw_lo > hi {
            return Err(IndexError::Config(format!(
                "too many mers ({approx_mers}) for {mer_size}-mers: \
                 need at least {raw_lo} table bits, at most {hi} usable"
            )));
        }
        let lo = raw_lo.max(MIN_AUTO_TABLE_BITS as u64).min(hi);
        let budget = if max_memory_mb == 0 {
            u64::MAX
        } else {
            max_memory_mb
        };

        let mut best: Option<(u64, u64, f64)> = None;
        for t in lo..=hi {
            let memory = ((1u64 << t) * posn_width)
                .saturating_add(approx_mers.saturating_mul(mer_bits - t + 1 + posn_width))
                >> 23;
            if memory >= budget {
                continue;
            }
            let effort = if max_mismatch > 0 {
                expected_mismatch_effort(t as u32, mer_size as u32, max_mismatch, approx_mers)
            } else {
                0.0
            };
            let better = match best {
                None => true,
                Some((_, m, e)) if max_mismatch > 0 => effort < e || (effort == e && memory < m),
                Some((_, m, _)) => memory < m,
            };
            if better {
                best = Some((t, memory, effort));
            }
            log::debug!("table bits {t}: ~{memory} MB, mismatch effort {effort:.3}");
        }

        match best {
            Some((t, memory, _)) => {
                log::info!(
                    "selected {t} table bits (~{memory} MB) for ~{approx_mers} {mer_size}-mers"
                );
                Self::new(mer_size, t as u32)
            }
            None => Err(IndexError::Config(format!(
                "no table size for ~{approx_mers} {mer_size}-mers fits in {max_memory_mb} MB"
            ))),
        }
    }

    #[inline]
    pub fn mer_size(&self) -> usize {
        self.mer_size as usize
    }

    #[inline]
    pub fn mer_bits(&self) -> u32 {
        2 * self.mer_size
    }

    #[inline]
    pub fn mer_mask(&self) -> u64 {
        mask(self.mer_bits())
    }

    #[inline]
    pub fn table_bits(&self) -> u32 {
        self.table_bits
    }

    /// Number of buckets.
    #[inline]
    pub fn table_size(&self) -> u64 {
        1u64 << self.table_bits
    }

    #[inline]
    pub fn hash_mask(&self) -> u64 {
        mask(self.table_bits)
    }

    #[inline]
    pub fn check_width(&self) -> u32 {
        self.mer_bits() - self.table_bits
    }

    /// Bucket of `mer`.
    #[inline]
    pub fn hash(&self, mer: u64) -> u64 {
        mer & self.hash_mask()
    }

    /// High bits of `mer` stored in its record.
    #[inline]
    pub fn check(&self, mer: u64) -> u64 {
        (mer & self.mer_mask()) >> self.table_bits
    }

    /// Inverse of the (hash, check) split.
    #[inline]
    pub fn rebuild(&self, hash: u64, check: u64) -> u64 {
        (check << self.table_bits) | hash
    }

    /// Two-bit base fields with at least one bit in the hash portion.
    #[inline]
    pub fn hash_fields(&self) -> u32 {
        self.table_bits.div_ceil(2)
    }
}

/// Expected records examined by one lookup allowing up to `n` substitutions
/// in the hash portion, given uniformly spread mers.
fn expected_mismatch_effort(table_bits: u32, mer_size: u32, n: u32, approx_mers: u64) -> f64 {
    let fields = table_bits.div_ceil(2).min(mer_size);
    let mut probes = 0.0f64;
    let mut choose = 1.0f64;
    for s in 0..=n.min(fields) {
        if s > 0 {
            choose = choose * (fields - s + 1) as f64 / s as f64;
        }
        probes += choose * 3f64.powi(s as i32);
    }
    probes * (1.0 + approx_mers as f64 / (1u64 << table_bits) as f64)
}
