//! Approximate lookup: every stored mer within a Hamming distance of a query.
//!
//! A stored mer at distance `n` differs from the query in at most `n` bases,
//! so its bucket index differs from the query's in at most `n` of the two-bit
//! fields of the hash portion. A [`MismatchPlan`] lists the XOR masks reaching
//! every such bucket exactly once. Every [`PositionDb`] carries a plan for its
//! mismatch limit, built once, so lookups do not allocate. Lookups apply each
//! mask to the query's hash, scan that bucket, rebuild each stored mer from
//! the perturbed hash and its check value, and keep the records at the
//! requested distance.

use crate::bits::base_differences;
use crate::error::{IndexError, Result};
use crate::position_db::{PositionBuffer, PositionDb};
use crate::table::TableGeometry;

/// Bucket perturbations for queries with up to `max_mismatch` substitutions.
///
/// Masks are ordered by the number of fields they change; the first is 0.
#[derive(Clone, Debug)]
pub struct MismatchPlan {
    table_bits: u32,
    max_mismatch: u32,
    masks: Vec<u64>,
    /// `ends[s]`: number of masks changing at most `s` fields.
    ends: Vec<usize>,
}

impl MismatchPlan {
    pub fn new(geometry: &TableGeometry, max_mismatch: u32) -> Result<Self> {
        if max_mismatch as usize > geometry.mer_size() {
            return Err(IndexError::Config(format!(
                "{max_mismatch} mismatches requested for {}-mers",
                geometry.mer_size()
            )));
        }
        let fields = geometry.hash_fields();
        let hash_mask = geometry.hash_mask();
        let shapes = max_mismatch.min(fields);

        let mut masks = vec![0u64];
        let mut ends = vec![1usize];
        let mut chosen = Vec::with_capacity(shapes as usize);
        for s in 1..=shapes {
            for_each_shape(fields, s, &mut chosen, &mut |shape: &[u32]| {
                for combo in 0..1u64 << (2 * s) {
                    let mut xor = 0u64;
                    let mut redundant = false;
                    for (j, &field) in shape.iter().enumerate() {
                        let delta = (combo >> (2 * j)) & 3;
                        // an unchanged field belongs to a smaller shape
                        redundant |= delta == 0;
                        xor |= delta << (2 * field);
                    }
                    if !redundant && xor & !hash_mask == 0 {
                        masks.push(xor);
                    }
                }
            });
            ends.push(masks.len());
        }
        log::debug!(
            "mismatch plan: {} buckets per query, up to {max_mismatch} mismatches, {fields} fields",
            masks.len()
        );
        Ok(Self {
            table_bits: geometry.table_bits(),
            max_mismatch,
            masks,
            ends,
        })
    }

    pub fn max_mismatch(&self) -> u32 {
        self.max_mismatch
    }

    /// Buckets scanned per query.
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Masks reaching every bucket within `n` mismatches.
    pub fn masks(&self, n: u32) -> &[u64] {
        let s = (n as usize).min(self.ends.len() - 1);
        &self.masks[..self.ends[s]]
    }
}

/// Call `f` with every ascending choice of `s` fields out of `0..fields`.
fn for_each_shape(fields: u32, s: u32, chosen: &mut Vec<u32>, f: &mut dyn FnMut(&[u32])) {
    if chosen.len() == s as usize {
        f(chosen.as_slice());
        return;
    }
    let first = chosen.last().map_or(0, |&c| c + 1);
    let left = s - chosen.len() as u32;
    for field in first..=fields - left {
        chosen.push(field);
        for_each_shape(fields, s, chosen, f);
        chosen.pop();
    }
}

impl PositionDb {
    /// A separate plan for up to `max_mismatch` substitutions, for queries
    /// past the limit the table was built with.
    pub fn mismatch_plan(&self, max_mismatch: u32) -> Result<MismatchPlan> {
        MismatchPlan::new(self.geometry(), max_mismatch)
    }

    fn stored_plan(&self, n: u32) -> Result<&MismatchPlan> {
        if n > self.mismatch.max_mismatch() {
            return Err(IndexError::Config(format!(
                "{n} mismatches requested from a table built for at most {}",
                self.mismatch.max_mismatch()
            )));
        }
        Ok(&self.mismatch)
    }

    /// Positions of stored mers at exactly `n` substitutions from `mer`.
    /// `n == 0` is a plain [`get`](PositionDb::get); larger `n` must not
    /// exceed [`max_mismatch`](PositionDb::max_mismatch).
    pub fn get_mismatch(&self, mer: u64, n: u32, buf: &mut PositionBuffer) -> Result<usize> {
        if n == 0 {
            return self.get(mer, buf);
        }
        let plan = self.stored_plan(n)?;
        self.get_mismatch_with(plan, mer, n, buf)
    }

    /// Positions of stored mers within `n` substitutions of `mer`, the mer
    /// itself included.
    pub fn get_up_to_n_mismatches(
        &self,
        mer: u64,
        n: u32,
        buf: &mut PositionBuffer,
    ) -> Result<usize> {
        let plan = self.stored_plan(n)?;
        self.get_up_to_n_mismatches_with(plan, mer, n, buf)
    }

    /// [`get_up_to_n_mismatches`](PositionDb::get_up_to_n_mismatches) with
    /// a caller-built plan.
    pub fn get_up_to_n_mismatches_with(
        &self,
        plan: &MismatchPlan,
        mer: u64,
        n: u32,
        buf: &mut PositionBuffer,
    ) -> Result<usize> {
        buf.clear();
        self.scan(plan, mer, n, |d| d <= n, buf)
    }

    /// [`get_mismatch`](PositionDb::get_mismatch) with a caller-built plan.
    pub fn get_mismatch_with(
        &self,
        plan: &MismatchPlan,
        mer: u64,
        n: u32,
        buf: &mut PositionBuffer,
    ) -> Result<usize> {
        buf.clear();
        self.scan(plan, mer, n, |d| d == n, buf)
    }

    fn scan(
        &self,
        plan: &MismatchPlan,
        mer: u64,
        n: u32,
        accept: impl Fn(u32) -> bool,
        buf: &mut PositionBuffer,
    ) -> Result<usize> {
        let geometry = self.geometry();
        if plan.table_bits != geometry.table_bits() {
            return Err(IndexError::Config(format!(
                "mismatch plan for {} table bits used with a {}-bit table",
                plan.table_bits,
                geometry.table_bits()
            )));
        }
        if n > plan.max_mismatch {
            return Err(IndexError::Config(format!(
                "{n} mismatches requested from a plan for at most {}",
                plan.max_mismatch
            )));
        }
        let mer = mer & geometry.mer_mask();
        let hash = geometry.hash(mer);
        let mut found = 0;
        for &xor in plan.masks(n) {
            let h = hash ^ xor;
            for i in self.core.bucket_range(h)? {
                let rec = self.core.read(i);
                if accept(base_differences(mer, geometry.rebuild(h, rec.check))) {
                    found += self.append_positions(&rec, buf)?;
                }
            }
        }
        Ok(found)
    }
}
