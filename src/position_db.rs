//! PositionDb: bucketed, bit-packed map from mer to sequence positions.
//!
//! Layout
//! - `table`: `table_size + 1` prefix-sum entries of `hash_width` bits; bucket
//!   `h` owns records `table[h]..table[h + 1]`.
//! - `buckets`: one record per distinct mer, `[check | pointer | unique]`,
//!   optionally followed by an external `[count]`. Unique mers inline their
//!   only position; others point into `positions`.
//! - `positions`: `[len, p0, .., p(len-1)]` runs of `posn_width`-bit values.
//!
//! Lookups only read the shared arrays and write into a caller-owned
//! [`PositionBuffer`], so one table can serve any number of threads. The
//! only mutation is [`PositionDb::set_count`], which needs `&mut`.

use std::ops::{Deref, Range};

use rayon::prelude::*;

use crate::bits::get_value;
use crate::bucket::{BucketRecord, BucketedTable, RecordLayout, RecordValue};
use crate::error::{IndexError, Result};
use crate::mismatch::MismatchPlan;
use crate::storage::Words;
use crate::table::TableGeometry;

/// Occurrence counters of a built table. Always `unique <= distinct <= total`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Stored occurrences.
    pub total: u64,
    /// Distinct mers (bucket records).
    pub distinct: u64,
    /// Mers stored with exactly one position.
    pub unique: u64,
    /// Values in the position-list store (lengths included).
    pub list_entries: u64,
    /// Longest position list.
    pub max_list_len: u64,
}

/// Reusable scratch space for lookup results, one per worker thread.
///
/// Growing an empty buffer drops its old allocation and reserves the needed
/// size plus 25%; repeated lookups of similar size do not allocate.
#[derive(Debug, Default, Clone)]
pub struct PositionBuffer {
    posns: Vec<u64>,
    list_reads: u64,
}

impl PositionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            posns: Vec::with_capacity(n),
            list_reads: 0,
        }
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.posns
    }

    pub fn capacity(&self) -> usize {
        self.posns.capacity()
    }

    /// How many position lists lookups through this buffer have read.
    pub fn list_reads(&self) -> u64 {
        self.list_reads
    }

    pub(crate) fn clear(&mut self) {
        self.posns.clear();
    }

    pub(crate) fn push(&mut self, p: u64) {
        self.posns.push(p);
    }

    /// Ensure room for `additional` more positions.
    pub(crate) fn make_room(&mut self, additional: usize) -> Result<()> {
        let needed = self.posns.len() + additional;
        if self.posns.capacity() >= needed {
            return Ok(());
        }
        let target = needed + needed / 4;
        if self.posns.is_empty() {
            self.posns = Vec::new();
        }
        let len = self.posns.len();
        self.posns
            .try_reserve_exact(target - len)
            .map_err(|_| IndexError::ScratchExhausted(target))
    }
}

impl Deref for PositionBuffer {
    type Target = [u64];

    fn deref(&self) -> &[u64] {
        &self.posns
    }
}

/// Position index over fixed-size mers.
pub struct PositionDb {
    pub(crate) core: BucketedTable,
    pub(crate) posn_width: u32,
    pub(crate) stats: DbStats,
    pub(crate) positions: Words,
    /// Built once for the table's mismatch limit and reused by every lookup.
    pub(crate) mismatch: MismatchPlan,
}

impl PositionDb {
    #[inline]
    pub fn geometry(&self) -> &TableGeometry {
        &self.core.geometry
    }

    #[inline]
    pub fn mer_size(&self) -> usize {
        self.core.geometry.mer_size()
    }

    #[inline]
    pub fn stats(&self) -> DbStats {
        self.stats
    }

    #[inline]
    pub fn layout(&self) -> RecordLayout {
        self.core.layout
    }

    /// Width of one bucket-start entry.
    #[inline]
    pub fn hash_width(&self) -> u32 {
        self.core.hash_width
    }

    /// Width of positions and list lengths.
    #[inline]
    pub fn posn_width(&self) -> u32 {
        self.posn_width
    }

    /// Largest mismatch count served by the stored plan.
    #[inline]
    pub fn max_mismatch(&self) -> u32 {
        self.mismatch.max_mismatch()
    }

    /// Whether records carry an external count.
    pub fn has_counts(&self) -> bool {
        self.core.layout.count_width() > 0
    }

    /// Whether the arrays live in a memory-mapped file.
    pub fn is_mapped(&self) -> bool {
        self.core.table.is_mapped()
    }

    /// Bytes held by the three packed arrays.
    pub fn size_in_bytes(&self) -> usize {
        self.core.size_in_bytes() + 8 * self.positions.len()
    }

    /// Record range of bucket `hash`.
    pub fn bucket_range(&self, hash: u64) -> Result<Range<u64>> {
        self.core.bucket_range(hash)
    }

    /// Typed records of bucket `hash`.
    pub fn records(&self, hash: u64) -> Result<impl Iterator<Item = BucketRecord> + '_> {
        let range = self.core.bucket_range(hash)?;
        Ok(range.map(move |i| self.core.read(i)))
    }

    fn find(&self, mer: u64) -> Result<Option<BucketRecord>> {
        self.core.find(mer)
    }

    /// Whether `mer` is stored.
    pub fn exists(&self, mer: u64) -> Result<bool> {
        Ok(self.find(mer)?.is_some())
    }

    /// Number of positions of `mer` (0 if absent).
    pub fn count(&self, mer: u64) -> Result<u64> {
        match self.find(mer)? {
            None => Ok(0),
            Some(rec) => self.record_count(&rec),
        }
    }

    /// Replace the contents of `buf` with every position of `mer`.
    /// Returns the number of positions, 0 if the mer is absent.
    pub fn get(&self, mer: u64, buf: &mut PositionBuffer) -> Result<usize> {
        buf.clear();
        match self.find(mer)? {
            None => Ok(0),
            Some(rec) => self.append_positions(&rec, buf),
        }
    }

    /// External count of `mer`; 0 if the mer is absent or was never counted.
    pub fn get_count(&self, mer: u64) -> Result<u64> {
        if !self.has_counts() {
            return Err(IndexError::Config("table was built without counts".into()));
        }
        Ok(match self.core.find_index(mer)? {
            Some(i) => self.core.layout.read_count(&self.core.buckets, i).unwrap_or(0),
            None => 0,
        })
    }

    /// Replace the external count of `mer`, saturating at the field width.
    /// Returns whether `mer` is stored.
    pub fn set_count(&mut self, mer: u64, count: u64) -> Result<bool> {
        if !self.has_counts() {
            return Err(IndexError::Config("table was built without counts".into()));
        }
        let Some(i) = self.core.find_index(mer)? else {
            return Ok(false);
        };
        let layout = self.core.layout;
        layout.write_count(self.core.buckets.as_mut_slice()?, i, count)?;
        Ok(true)
    }

    /// Positions of many mers, looked up in parallel with one buffer per worker.
    pub fn lookup_batch(&self, mers: &[u64]) -> Result<Vec<Vec<u64>>> {
        mers.par_iter()
            .map_init(PositionBuffer::new, |buf, &mer| {
                self.get(mer, buf).map(|_| buf.to_vec())
            })
            .collect()
    }

    /// Visit every stored mer with its occurrence count, bucket by bucket.
    pub fn for_each_mer<F: FnMut(u64, u64)>(&self, mut f: F) -> Result<()> {
        let geometry = self.core.geometry;
        for hash in 0..geometry.table_size() {
            for rec in self.records(hash)? {
                let mer = geometry.rebuild(hash, rec.check);
                f(mer, self.record_count(&rec)?);
            }
        }
        Ok(())
    }

    pub(crate) fn record_count(&self, rec: &BucketRecord) -> Result<u64> {
        match rec.value {
            RecordValue::Unique(_) => Ok(1),
            RecordValue::List(off) => self.list_len(off),
            other => Err(IndexError::Corrupt(format!(
                "position table holds an existence record {other:?}"
            ))),
        }
    }

    /// Append the positions of `rec` to `buf`.
    pub(crate) fn append_positions(
        &self,
        rec: &BucketRecord,
        buf: &mut PositionBuffer,
    ) -> Result<usize> {
        match rec.value {
            RecordValue::Unique(p) => {
                buf.make_room(1)?;
                buf.push(p);
                Ok(1)
            }
            RecordValue::List(off) => {
                buf.list_reads += 1;
                let len = self.list_len(off)?;
                buf.make_room(len as usize)?;
                let pw = self.posn_width as u64;
                let mut bit = (off + 1) * pw;
                for _ in 0..len {
                    buf.push(get_value(&self.positions, bit, self.posn_width));
                    bit += pw;
                }
                Ok(len as usize)
            }
            other => Err(IndexError::Corrupt(format!(
                "position table holds an existence record {other:?}"
            ))),
        }
    }

    fn list_len(&self, off: u64) -> Result<u64> {
        if off >= self.stats.list_entries {
            return Err(IndexError::Corrupt(format!(
                "list offset {off} past {} entries",
                self.stats.list_entries
            )));
        }
        let len = get_value(
            &self.positions,
            off * self.posn_width as u64,
            self.posn_width,
        );
        if off + 1 + len > self.stats.list_entries {
            return Err(IndexError::Corrupt(format!(
                "list at {off} of length {len} overruns the position store"
            )));
        }
        Ok(len)
    }
}
