//! Two-pass position table construction.
//!
//! 1. Count occurrences per bucket.
//! 2. Prefix-sum the counts into bucket starts, then re-stream and place every
//!    occurrence into a packed staging array at `start[h] + cursor[h]++`.
//! 3. Sort each staging bucket by (check, position), group equal checks and
//!    decide which groups survive the count range and mask/only filters.
//! 4. Allocate the final arrays at their exact sizes and transfer.
//! 5. Optionally attach external per-mer counts, sized for the largest one.
//!
//! Nothing is resized after allocation, and a table is only returned once
//! every step has completed.

use std::ops::Range;

use crate::bits::{get_value, get_values, log_base_two, set_value, set_values, words_for_bits};
use crate::bucket::{BucketRecord, BucketedTable, RecordLayout, RecordValue};
use crate::encode::{canonical, revcomp};
use crate::error::{IndexError, Result};
use crate::exist_db::ExistDb;
use crate::mismatch::MismatchPlan;
use crate::position_db::{DbStats, PositionDb};
use crate::radix::sort_check_value_pairs;
use crate::stream::{MerCount, MerOccurrence, MerStream};
use crate::table::TableGeometry;

/// Positions must leave the top bits of a word free.
const MAX_POSITION_BITS: u32 = 60;

/// Build-time configuration.
#[derive(Clone)]
pub struct BuildConfig<'a> {
    table_bits: Option<u32>,
    min_count: u64,
    max_count: u64,
    max_memory_mb: u64,
    max_mismatch: u32,
    mask: Option<&'a ExistDb>,
    only: Option<&'a ExistDb>,
}

impl Default for BuildConfig<'_> {
    fn default() -> Self {
        Self {
            table_bits: None,
            min_count: 1,
            max_count: u64::MAX,
            max_memory_mb: 0,
            max_mismatch: 0,
            mask: None,
            only: None,
        }
    }
}

impl<'a> BuildConfig<'a> {
    /// Fix the number of bucket bits instead of sizing automatically.
    pub fn table_bits(mut self, bits: u32) -> Self {
        self.table_bits = Some(bits);
        self
    }
    /// Keep only mers occurring `lo..=hi` times.
    pub fn count_range(mut self, lo: u64, hi: u64) -> Self {
        self.min_count = lo;
        self.max_count = hi;
        self
    }
    /// Memory ceiling (MB) for automatic table sizing; 0 = unlimited.
    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }
    /// Largest mismatch count `get_mismatch` serves from the table's stored
    /// plan. Also steers automatic table sizing.
    pub fn max_mismatch(mut self, n: u32) -> Self {
        self.max_mismatch = n;
        self
    }
    /// Drop mers present in `db`.
    pub fn mask(mut self, db: &'a ExistDb) -> Self {
        self.mask = Some(db);
        self
    }
    /// Keep only mers present in `db`.
    pub fn only(mut self, db: &'a ExistDb) -> Self {
        self.only = Some(db);
        self
    }

    fn geometry(&self, mer_size: usize, approx_mers: u64) -> Result<TableGeometry> {
        match self.table_bits {
            Some(bits) => TableGeometry::new(mer_size, bits),
            None => TableGeometry::auto(
                mer_size,
                approx_mers,
                self.max_memory_mb,
                self.max_mismatch,
            ),
        }
    }

    fn validate(&self, mer_size: usize) -> Result<()> {
        if self.min_count > self.max_count {
            return Err(IndexError::Config(format!(
                "empty count range {}..={}",
                self.min_count, self.max_count
            )));
        }
        for (what, db) in [("mask", self.mask), ("only", self.only)] {
            if let Some(db) = db {
                if db.mer_size() != mer_size {
                    return Err(IndexError::Config(format!(
                        "{what} table holds {}-mers, building {mer_size}-mers",
                        db.mer_size()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether a group of `n` occurrences of `mer` is stored.
    fn keeps(&self, mer: u64, n: u64, mer_size: usize) -> Result<bool> {
        if n < self.min_count || n > self.max_count {
            return Ok(false);
        }
        if let Some(mask) = self.mask {
            if mask.exists(filter_probe(mask, mer, mer_size))? {
                return Ok(false);
            }
        }
        if let Some(only) = self.only {
            if !only.exists(filter_probe(only, mer, mer_size))? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Filter tables built from canonical mers are probed with the canonical form.
fn filter_probe(db: &ExistDb, mer: u64, mer_size: usize) -> u64 {
    if db.is_canonical() {
        canonical(mer, mer_size)
    } else {
        mer
    }
}

/// Build a position table for `mer_size`-mers from a stream of occurrences.
pub fn build_position_db<S>(
    stream: &mut S,
    mer_size: usize,
    cfg: &BuildConfig<'_>,
) -> Result<PositionDb>
where
    S: MerStream<Item = MerOccurrence>,
{
    build(stream, None, mer_size, cfg)
}

/// [`build_position_db`], then attach an external count to every stored mer.
///
/// Each counted mer sets the count of both its strands; stored mers missing
/// from `counts` keep 0. The count field is as wide as the largest count
/// that matched a stored mer needs.
pub fn build_position_db_with_counts<S, C>(
    stream: &mut S,
    counts: &mut C,
    mer_size: usize,
    cfg: &BuildConfig<'_>,
) -> Result<PositionDb>
where
    S: MerStream<Item = MerOccurrence>,
    C: MerStream<Item = MerCount>,
{
    build(stream, Some(counts as &mut dyn MerStream<Item = MerCount>), mer_size, cfg)
}

fn build<S>(
    stream: &mut S,
    counts: Option<&mut dyn MerStream<Item = MerCount>>,
    mer_size: usize,
    cfg: &BuildConfig<'_>,
) -> Result<PositionDb>
where
    S: MerStream<Item = MerOccurrence>,
{
    let geometry = cfg.geometry(mer_size, stream.approximate_len())?;
    cfg.validate(mer_size)?;
    let mismatch = MismatchPlan::new(&geometry, cfg.max_mismatch)?;
    let table_size = geometry.table_size() as usize;
    let check_width = geometry.check_width();

    // 1) count bucket sizes
    let mut sizes = vec![0u64; table_size];
    let mut max_pos = 0u64;
    stream.rewind()?;
    while let Some(o) = stream.next_item()? {
        if o.position >> MAX_POSITION_BITS != 0 {
            return Err(IndexError::Config(format!(
                "position {} needs more than {MAX_POSITION_BITS} bits",
                o.position
            )));
        }
        sizes[geometry.hash(o.mer) as usize] += 1;
        max_pos = max_pos.max(o.position);
    }

    // 2) place occurrences
    let raw_posn_width = log_base_two(max_pos + 1).max(1);
    let mut staging = Staging::new(sizes, check_width, raw_posn_width);
    log::info!(
        "counted {} {mer_size}-mers (max position {max_pos}) over {table_size} buckets",
        staging.total()
    );
    stream.rewind()?;
    while let Some(o) = stream.next_item()? {
        if o.position > max_pos {
            return Err(changed_stream());
        }
        staging.place(geometry.hash(o.mer) as usize, geometry.check(o.mer), o.position)?;
    }
    staging.ensure_full()?;

    // 3) sort buckets, decide which mers stay
    let mut checks = Vec::new();
    let mut posns = Vec::new();
    let mut keep = vec![0u64; words_for_bits(staging.total())];
    let mut group = 0u64;
    let mut stats = DbStats::default();

    for h in 0..table_size {
        if staging.sort_bucket(h, &mut checks, &mut posns) == 0 {
            continue;
        }
        for run in runs(&checks) {
            let n = run.len() as u64;
            let mer = geometry.rebuild(h as u64, checks[run.start]);
            if cfg.keeps(mer, n, mer_size)? {
                set_value(&mut keep, group, 1, 1);
                stats.total += n;
                stats.distinct += 1;
                if n == 1 {
                    stats.unique += 1;
                } else {
                    stats.list_entries += n + 1;
                    stats.max_list_len = stats.max_list_len.max(n);
                }
            }
            group += 1;
        }
    }
    log::info!(
        "{} total, {} distinct, {} unique mers; {} list entries (longest {})",
        stats.total,
        stats.distinct,
        stats.unique,
        stats.list_entries,
        stats.max_list_len
    );

    // 4) final arrays
    let posn_width = raw_posn_width.max(log_base_two(stats.max_list_len + 1));
    let pptr_width = posn_width.max(log_base_two(stats.list_entries + 1));
    let layout = RecordLayout::positions(check_width, pptr_width, 0);
    let mut writer = BucketWriter::new(geometry, layout, stats.distinct);
    log::debug!(
        "widths: hash {}, check {check_width}, posn {posn_width}, pointer {pptr_width}, record {}",
        writer.hash_width,
        layout.record_width()
    );

    let pw = posn_width as u64;
    let mut positions = vec![0u64; words_for_bits(stats.list_entries * pw)];
    let mut list_at = 0u64;
    group = 0;
    for h in 0..table_size {
        writer.start_bucket(h as u64);
        if staging.bucket(h, &mut checks, &mut posns) == 0 {
            continue;
        }
        for run in runs(&checks) {
            let kept = get_value(&keep, group, 1) == 1;
            group += 1;
            if !kept {
                continue;
            }
            let check = checks[run.start];
            let value = if run.len() == 1 {
                RecordValue::Unique(posns[run.start])
            } else {
                let off = list_at;
                set_value(&mut positions, list_at * pw, posn_width, run.len() as u64);
                list_at += 1;
                for &p in &posns[run] {
                    set_value(&mut positions, list_at * pw, posn_width, p);
                    list_at += 1;
                }
                RecordValue::List(off)
            };
            writer.push(&BucketRecord { check, value })?;
        }
    }
    debug_assert_eq!(list_at, stats.list_entries);

    let mut core = writer.finish();
    if let Some(counts) = counts {
        core = attach_counts(core, counts)?;
    }
    Ok(PositionDb {
        core,
        posn_width,
        stats,
        positions: positions.into(),
        mismatch,
    })
}

/// Re-pack the records of `core` with a count field filled from `counts`.
fn attach_counts(
    core: BucketedTable,
    counts: &mut dyn MerStream<Item = MerCount>,
) -> Result<BucketedTable> {
    let geometry = core.geometry;
    let mut values = vec![0u64; core.records as usize];
    let (mut loaded, mut largest) = (0u64, 0u64);
    counts.rewind()?;
    while let Some(item) = counts.next_item()? {
        let mer = item.mer & geometry.mer_mask();
        let fwd = core.find_index(mer)?;
        let rev = core.find_index(revcomp(mer, geometry.mer_size()))?;
        if fwd.is_none() && rev.is_none() {
            continue;
        }
        for i in [fwd, rev].into_iter().flatten() {
            values[i as usize] = item.count;
        }
        loaded += 1;
        largest = largest.max(item.count);
    }

    let layout = core
        .layout
        .with_count_width(log_base_two(largest.saturating_add(1)).max(1));
    let mut buckets = vec![0u64; words_for_bits(core.records * layout.record_width() as u64)];
    for (i, &count) in values.iter().enumerate() {
        let i = i as u64;
        layout.write(&mut buckets, i, &core.read(i))?;
        layout.write_count(&mut buckets, i, count)?;
    }
    log::info!(
        "loaded {loaded} mer counts, largest {largest} ({} bits)",
        layout.count_width()
    );
    Ok(BucketedTable {
        layout,
        buckets: buckets.into(),
        ..core
    })
}

fn changed_stream() -> IndexError {
    IndexError::Corrupt("mer stream changed between the counting and placement passes".into())
}

/// Packed `(check, value)` pairs laid out bucket by bucket.
///
/// Sized from per-bucket counts of a first pass; the prefix sums give each
/// bucket's start and the counts are reset to serve as fill cursors.
pub(crate) struct Staging {
    widths: [u32; 2],
    starts: Vec<u64>,
    cursors: Vec<u64>,
    placed: u64,
    words: Vec<u64>,
}

impl Staging {
    pub(crate) fn new(mut sizes: Vec<u64>, check_width: u32, value_width: u32) -> Self {
        let mut starts = Vec::with_capacity(sizes.len() + 1);
        let mut acc = 0u64;
        for size in sizes.iter_mut() {
            starts.push(acc);
            acc += *size;
            *size = 0;
        }
        starts.push(acc);
        let width = (check_width + value_width) as u64;
        log::debug!(
            "staging {acc} entries at {width} bits ({} KB)",
            words_for_bits(acc * width) / 128
        );
        Self {
            widths: [check_width, value_width],
            starts,
            cursors: sizes,
            placed: 0,
            words: vec![0u64; words_for_bits(acc * width)],
        }
    }

    #[inline]
    fn width(&self) -> u64 {
        (self.widths[0] + self.widths[1]) as u64
    }

    pub(crate) fn total(&self) -> u64 {
        self.starts.last().copied().unwrap_or(0)
    }

    /// Append an entry to bucket `h`.
    pub(crate) fn place(&mut self, h: usize, check: u64, value: u64) -> Result<()> {
        let slot = self.starts[h] + self.cursors[h];
        if slot >= self.starts[h + 1] {
            return Err(changed_stream());
        }
        self.cursors[h] += 1;
        self.placed += 1;
        let at = slot * self.width();
        set_values(&mut self.words, at, &self.widths, &[check, value]);
        Ok(())
    }

    /// Every counted entry was placed.
    pub(crate) fn ensure_full(&self) -> Result<()> {
        if self.placed != self.total() {
            return Err(IndexError::Corrupt(format!(
                "mer stream yielded {} entries, then {}",
                self.total(),
                self.placed
            )));
        }
        Ok(())
    }

    fn range(&self, h: usize) -> Range<u64> {
        self.starts[h]..self.starts[h + 1]
    }

    /// Unpack bucket `h` into parallel vectors; returns its length.
    pub(crate) fn bucket(&self, h: usize, checks: &mut Vec<u64>, vals: &mut Vec<u64>) -> usize {
        checks.clear();
        vals.clear();
        let width = self.width();
        let mut pair = [0u64; 2];
        for i in self.range(h) {
            get_values(&self.words, i * width, &self.widths, &mut pair);
            checks.push(pair[0]);
            vals.push(pair[1]);
        }
        checks.len()
    }

    /// Like [`bucket`](Self::bucket), but sorted by (check, value); the sorted
    /// order is also written back.
    pub(crate) fn sort_bucket(
        &mut self,
        h: usize,
        checks: &mut Vec<u64>,
        vals: &mut Vec<u64>,
    ) -> usize {
        let n = self.bucket(h, checks, vals);
        if n > 1 {
            sort_check_value_pairs(checks, vals, self.widths[0], self.widths[1]);
            let width = self.width();
            let st = self.starts[h];
            for (i, (&c, &v)) in checks.iter().zip(vals.iter()).enumerate() {
                set_values(&mut self.words, (st + i as u64) * width, &self.widths, &[c, v]);
            }
        }
        n
    }
}

/// Writes records bucket by bucket into exactly sized arrays.
pub(crate) struct BucketWriter {
    geometry: TableGeometry,
    layout: RecordLayout,
    hash_width: u32,
    records: u64,
    next: u64,
    table: Vec<u64>,
    buckets: Vec<u64>,
}

impl BucketWriter {
    pub(crate) fn new(geometry: TableGeometry, layout: RecordLayout, records: u64) -> Self {
        let hash_width = log_base_two(records + 1).max(1);
        let entries = geometry.table_size() + 1;
        Self {
            geometry,
            layout,
            hash_width,
            records,
            next: 0,
            table: vec![0u64; words_for_bits(entries * hash_width as u64)],
            buckets: vec![0u64; words_for_bits(records * layout.record_width() as u64)],
        }
    }

    /// Buckets must be started in increasing order, every one of them.
    pub(crate) fn start_bucket(&mut self, h: u64) {
        set_value(
            &mut self.table,
            h * self.hash_width as u64,
            self.hash_width,
            self.next,
        );
    }

    pub(crate) fn push(&mut self, record: &BucketRecord) -> Result<()> {
        debug_assert!(self.next < self.records);
        self.layout.write(&mut self.buckets, self.next, record)?;
        self.next += 1;
        Ok(())
    }

    pub(crate) fn finish(mut self) -> BucketedTable {
        let end = self.geometry.table_size();
        self.start_bucket(end);
        debug_assert_eq!(self.next, self.records);
        BucketedTable {
            geometry: self.geometry,
            layout: self.layout,
            hash_width: self.hash_width,
            records: self.next,
            table: self.table.into(),
            buckets: self.buckets.into(),
        }
    }
}

/// Index ranges of equal adjacent values.
pub(crate) fn runs(sorted: &[u64]) -> impl Iterator<Item = Range<usize>> + '_ {
    let mut st = 0usize;
    std::iter::from_fn(move || {
        if st >= sorted.len() {
            return None;
        }
        let mut ed = st + 1;
        while ed < sorted.len() && sorted[ed] == sorted[st] {
            ed += 1;
        }
        let run = st..ed;
        st = ed;
        Some(run)
    })
}
