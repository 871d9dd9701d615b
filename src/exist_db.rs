//! ExistDb: which mers occur, and optionally how often.
//!
//! Same bucketed layout as the position table, without the position store.
//! Records are `[check]` or `[check | count]`. Built from a stream of mers
//! with externally computed counts.

use crate::bits::log_base_two;
use crate::builder::{BucketWriter, Staging, runs};
use crate::bucket::{BucketRecord, BucketedTable, RecordLayout, RecordValue};
use crate::encode::revcomp;
use crate::error::{IndexError, Result};
use crate::stream::{MerCount, MerStream};
use crate::table::TableGeometry;

/// Which strand(s) of each input mer are inserted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InsertMode {
    #[default]
    Forward,
    Reverse,
    /// Forward and reverse complement; a palindrome is inserted once.
    Both,
    /// Lesser of the two strands. Not supported by the builder.
    Canonical,
}

#[derive(Clone, Debug)]
pub struct ExistConfig {
    mode: InsertMode,
    min_count: u64,
    max_count: u64,
    store_counts: bool,
    table_bits: Option<u32>,
    max_memory_mb: u64,
}

impl Default for ExistConfig {
    fn default() -> Self {
        Self {
            mode: InsertMode::Forward,
            min_count: 0,
            max_count: u64::MAX,
            store_counts: false,
            table_bits: None,
            max_memory_mb: 0,
        }
    }
}

impl ExistConfig {
    pub fn mode(mut self, mode: InsertMode) -> Self {
        self.mode = mode;
        self
    }
    /// Skip input mers whose count is outside `lo..=hi`.
    pub fn count_range(mut self, lo: u64, hi: u64) -> Self {
        self.min_count = lo;
        self.max_count = hi;
        self
    }
    pub fn store_counts(mut self, yes: bool) -> Self {
        self.store_counts = yes;
        self
    }
    pub fn table_bits(mut self, bits: u32) -> Self {
        self.table_bits = Some(bits);
        self
    }
    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    #[inline]
    fn in_range(&self, count: u64) -> bool {
        (self.min_count..=self.max_count).contains(&count)
    }

    /// Keys inserted for `mer`; the second is only set in `Both` mode.
    fn keys(&self, mer: u64, mer_size: usize) -> (u64, Option<u64>) {
        match self.mode {
            InsertMode::Forward => (mer, None),
            InsertMode::Reverse => (revcomp(mer, mer_size), None),
            InsertMode::Both => {
                let rc = revcomp(mer, mer_size);
                (mer, (rc != mer).then_some(rc))
            }
            // rejected before any key is computed
            InsertMode::Canonical => (mer, None),
        }
    }
}

/// Counters of a built existence table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExistStats {
    /// Keys inserted (after filtering and strand expansion).
    pub inserted: u64,
    /// Distinct mers stored.
    pub distinct: u64,
    /// Largest merged count.
    pub max_count: u64,
}

/// Existence (and count) table over fixed-size mers.
pub struct ExistDb {
    pub(crate) core: BucketedTable,
    pub(crate) canonical: bool,
    pub(crate) stats: ExistStats,
}

impl ExistDb {
    #[inline]
    pub fn geometry(&self) -> &TableGeometry {
        &self.core.geometry
    }

    #[inline]
    pub fn mer_size(&self) -> usize {
        self.core.geometry.mer_size()
    }

    #[inline]
    pub fn stats(&self) -> ExistStats {
        self.stats
    }

    /// Whether records carry a count field.
    pub fn stores_counts(&self) -> bool {
        self.core.layout.count_width() > 0
    }

    /// Whether the table holds canonical mers; filters probe it with the
    /// canonical form of a mer.
    pub fn is_canonical(&self) -> bool {
        self.canonical
    }

    pub fn is_mapped(&self) -> bool {
        self.core.table.is_mapped()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.core.size_in_bytes()
    }

    pub fn exists(&self, mer: u64) -> Result<bool> {
        Ok(self.core.find(mer)?.is_some())
    }

    /// Stored count of `mer`: 0 if absent, 1 if present and counts are not kept.
    pub fn count(&self, mer: u64) -> Result<u64> {
        match self.core.find(mer)? {
            None => Ok(0),
            Some(BucketRecord {
                value: RecordValue::Present,
                ..
            }) => Ok(1),
            Some(BucketRecord {
                value: RecordValue::Count(c),
                ..
            }) => Ok(c),
            Some(rec) => Err(IndexError::Corrupt(format!(
                "existence table holds a position record {:?}",
                rec.value
            ))),
        }
    }

    /// Visit every stored mer with its count.
    pub fn for_each_mer<F: FnMut(u64, u64)>(&self, mut f: F) -> Result<()> {
        let geometry = self.core.geometry;
        for hash in 0..geometry.table_size() {
            for i in self.core.bucket_range(hash)? {
                let rec = self.core.read(i);
                let count = match rec.value {
                    RecordValue::Count(c) => c,
                    _ => 1,
                };
                f(geometry.rebuild(hash, rec.check), count);
            }
        }
        Ok(())
    }
}

/// Build an existence table for `mer_size`-mers from counted mers.
///
/// Keys that occur more than once (repeated input, or both strands of
/// different inputs) are merged and their counts summed.
pub fn build_exist_db<S>(stream: &mut S, mer_size: usize, cfg: &ExistConfig) -> Result<ExistDb>
where
    S: MerStream<Item = MerCount>,
{
    if cfg.mode == InsertMode::Canonical {
        return Err(IndexError::Unimplemented("canonical insertion into an existence table"));
    }
    if cfg.min_count > cfg.max_count {
        return Err(IndexError::Config(format!(
            "empty count range {}..={}",
            cfg.min_count, cfg.max_count
        )));
    }
    let approx = match cfg.mode {
        InsertMode::Both => stream.approximate_len().saturating_mul(2),
        _ => stream.approximate_len(),
    };
    let geometry = match cfg.table_bits {
        Some(bits) => TableGeometry::new(mer_size, bits)?,
        None => TableGeometry::auto(mer_size, approx, cfg.max_memory_mb, 0)?,
    };
    let table_size = geometry.table_size() as usize;

    // 1) count bucket sizes
    let mut sizes = vec![0u64; table_size];
    let mut max_input = 0u64;
    let mut skipped = 0u64;
    stream.rewind()?;
    while let Some(item) = stream.next_item()? {
        if !cfg.in_range(item.count) {
            skipped += 1;
            continue;
        }
        max_input = max_input.max(item.count);
        let (a, b) = cfg.keys(item.mer, mer_size);
        sizes[geometry.hash(a) as usize] += 1;
        if let Some(b) = b {
            sizes[geometry.hash(b) as usize] += 1;
        }
    }

    // 2) place keys with their counts
    let count_bits = log_base_two(max_input.saturating_add(1)).max(1);
    let mut staging = Staging::new(sizes, geometry.check_width(), count_bits);
    log::info!(
        "inserting {} {mer_size}-mer keys ({skipped} outside the count range)",
        staging.total()
    );
    stream.rewind()?;
    while let Some(item) = stream.next_item()? {
        if !cfg.in_range(item.count) {
            continue;
        }
        if item.count > max_input {
            return Err(IndexError::Corrupt(
                "mer stream changed between the counting and placement passes".into(),
            ));
        }
        let (a, b) = cfg.keys(item.mer, mer_size);
        staging.place(geometry.hash(a) as usize, geometry.check(a), item.count)?;
        if let Some(b) = b {
            staging.place(geometry.hash(b) as usize, geometry.check(b), item.count)?;
        }
    }
    staging.ensure_full()?;

    // 3) merge duplicates
    let mut checks = Vec::new();
    let mut counts = Vec::new();
    let mut stats = ExistStats {
        inserted: staging.total(),
        ..ExistStats::default()
    };
    for h in 0..table_size {
        if staging.sort_bucket(h, &mut checks, &mut counts) == 0 {
            continue;
        }
        for run in runs(&checks) {
            stats.distinct += 1;
            let sum = merged(&counts[run]);
            stats.max_count = stats.max_count.max(sum);
        }
    }

    // 4) final arrays
    let count_width = if cfg.store_counts {
        log_base_two(stats.max_count.saturating_add(1)).max(1)
    } else {
        0
    };
    let layout = RecordLayout::existence(geometry.check_width(), count_width);
    let mut writer = BucketWriter::new(geometry, layout, stats.distinct);
    for h in 0..table_size {
        writer.start_bucket(h as u64);
        if staging.bucket(h, &mut checks, &mut counts) == 0 {
            continue;
        }
        for run in runs(&checks) {
            let check = checks[run.start];
            let value = if cfg.store_counts {
                RecordValue::Count(merged(&counts[run]))
            } else {
                RecordValue::Present
            };
            writer.push(&BucketRecord { check, value })?;
        }
    }
    log::info!(
        "{} distinct mers from {} keys, largest count {}",
        stats.distinct,
        stats.inserted,
        stats.max_count
    );

    Ok(ExistDb {
        core: writer.finish(),
        canonical: false,
        stats,
    })
}

fn merged(counts: &[u64]) -> u64 {
    counts.iter().fold(0u64, |a, &c| a.saturating_add(c))
}
