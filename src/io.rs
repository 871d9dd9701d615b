//! On-disk format: one file per table.
//!
//! A fixed 112-byte little-endian header followed by up to three 8-byte
//! aligned word segments: bucket starts, bucket records, position lists.
//!
//! ```text
//! magic u64            "KPOSDB01" | "KEXIDB01"
//! version u32, flags u32
//! mer_size, table_bits, hash_width, check_width,
//! posn_width, pptr_width, count_width, max_mismatch (u32 each)
//! total, distinct, unique, max_list_len, list_entries (u64 each)
//! table_words, bucket_words, position_words          (u64 each)
//! ```
//!
//! Existence tables store their key count in `total`, their largest count in
//! `max_list_len`, and have no position segment. `count_width` is non-zero
//! exactly when the counts flag is set, for both kinds.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

use crate::bits::{get_value, words_for_bits};
use crate::bucket::{BucketedTable, RecordLayout};
use crate::error::{IndexError, Result};
use crate::exist_db::{ExistDb, ExistStats};
use crate::mismatch::MismatchPlan;
use crate::position_db::{DbStats, PositionDb};
use crate::storage::Words;
use crate::table::TableGeometry;

pub const POSITION_MAGIC: u64 = u64::from_le_bytes(*b"KPOSDB01");
pub const EXIST_MAGIC: u64 = u64::from_le_bytes(*b"KEXIDB01");
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_BYTES: u64 = 112;

const FLAG_LISTS: u32 = 1;
const FLAG_COUNTS: u32 = 1 << 1;
const FLAG_CANONICAL: u32 = 1 << 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableKind {
    Positions,
    Existence,
}

impl TableKind {
    fn magic(self) -> u64 {
        match self {
            TableKind::Positions => POSITION_MAGIC,
            TableKind::Existence => EXIST_MAGIC,
        }
    }
}

/// Decoded file header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub kind: TableKind,
    pub version: u32,
    pub flags: u32,
    pub mer_size: u32,
    pub table_bits: u32,
    pub hash_width: u32,
    pub check_width: u32,
    pub posn_width: u32,
    pub pptr_width: u32,
    pub count_width: u32,
    /// Mismatch limit of a position table's stored plan; 0 for existence tables.
    pub max_mismatch: u32,
    pub total: u64,
    pub distinct: u64,
    pub unique: u64,
    pub max_list_len: u64,
    pub list_entries: u64,
    pub table_words: u64,
    pub bucket_words: u64,
    pub position_words: u64,
}

impl FileHeader {
    pub fn is_canonical(&self) -> bool {
        self.flags & FLAG_CANONICAL != 0
    }

    pub fn stores_counts(&self) -> bool {
        self.flags & FLAG_COUNTS != 0
    }

    /// Total file size the header describes.
    pub fn file_len(&self) -> u64 {
        let words = self
            .table_words
            .saturating_add(self.bucket_words)
            .saturating_add(self.position_words);
        HEADER_BYTES.saturating_add(words.saturating_mul(8))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u64::<LE>(self.kind.magic())?;
        w.write_u32::<LE>(self.version)?;
        w.write_u32::<LE>(self.flags)?;
        for x in [
            self.mer_size,
            self.table_bits,
            self.hash_width,
            self.check_width,
            self.posn_width,
            self.pptr_width,
            self.count_width,
            self.max_mismatch,
        ] {
            w.write_u32::<LE>(x)?;
        }
        for x in [
            self.total,
            self.distinct,
            self.unique,
            self.max_list_len,
            self.list_entries,
            self.table_words,
            self.bucket_words,
            self.position_words,
        ] {
            w.write_u64::<LE>(x)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let kind = match r.read_u64::<LE>()? {
            POSITION_MAGIC => TableKind::Positions,
            EXIST_MAGIC => TableKind::Existence,
            other => {
                return Err(IndexError::Format(format!("bad magic {other:#018x}")));
            }
        };
        let version = r.read_u32::<LE>()?;
        if version != FORMAT_VERSION {
            return Err(IndexError::Format(format!("unsupported version {version}")));
        }
        let flags = r.read_u32::<LE>()?;
        let mut w = [0u32; 8];
        r.read_u32_into::<LE>(&mut w)?;
        let mut n = [0u64; 8];
        r.read_u64_into::<LE>(&mut n)?;
        Ok(FileHeader {
            kind,
            version,
            flags,
            mer_size: w[0],
            table_bits: w[1],
            hash_width: w[2],
            check_width: w[3],
            posn_width: w[4],
            pptr_width: w[5],
            count_width: w[6],
            max_mismatch: w[7],
            total: n[0],
            distinct: n[1],
            unique: n[2],
            max_list_len: n[3],
            list_entries: n[4],
            table_words: n[5],
            bucket_words: n[6],
            position_words: n[7],
        })
    }

    /// Check that the widths and segment lengths describe one consistent table.
    fn validate(&self, expected: TableKind) -> Result<(TableGeometry, RecordLayout)> {
        if self.kind != expected {
            return Err(IndexError::Format(format!(
                "expected a {expected:?} table, found {:?}",
                self.kind
            )));
        }
        let geometry = TableGeometry::new(self.mer_size as usize, self.table_bits)
            .map_err(|e| IndexError::Format(e.to_string()))?;
        if self.check_width != geometry.check_width() {
            return Err(IndexError::Format(format!(
                "check width {} does not match {}-mers over {} table bits",
                self.check_width, self.mer_size, self.table_bits
            )));
        }
        if !(1..=64).contains(&self.hash_width) || self.count_width > 64 {
            return Err(IndexError::Format("field width out of range".into()));
        }
        if self.stores_counts() != (self.count_width > 0) {
            return Err(IndexError::Format(format!(
                "counts flag disagrees with count width {}",
                self.count_width
            )));
        }
        if self.max_mismatch > self.mer_size {
            return Err(IndexError::Format(format!(
                "{} mismatches stored for {}-mers",
                self.max_mismatch, self.mer_size
            )));
        }
        if self.unique > self.distinct || self.distinct > self.total {
            return Err(IndexError::Format(format!(
                "inconsistent counters: {} unique, {} distinct, {} total",
                self.unique, self.distinct, self.total
            )));
        }
        let layout = match self.kind {
            TableKind::Positions => {
                if !(1..=64).contains(&self.posn_width)
                    || self.pptr_width < self.posn_width
                    || self.pptr_width > 64
                {
                    return Err(IndexError::Format(format!(
                        "position width {} / pointer width {}",
                        self.posn_width, self.pptr_width
                    )));
                }
                RecordLayout::positions(self.check_width, self.pptr_width, self.count_width)
            }
            TableKind::Existence => RecordLayout::existence(self.check_width, self.count_width),
        };

        let table_entries = geometry.table_size() + 1;
        let record_bits = self.distinct.saturating_mul(layout.record_width() as u64);
        let list_bits = self.list_entries.saturating_mul(self.posn_width as u64);
        let expect = [
            ("table", self.table_words, table_entries * self.hash_width as u64),
            ("bucket", self.bucket_words, record_bits),
            ("position", self.position_words, list_bits),
        ];
        for (what, words, bits) in expect {
            if words != words_for_bits(bits) as u64 {
                return Err(IndexError::Format(format!(
                    "{what} segment holds {words} words, expected {}",
                    words_for_bits(bits)
                )));
            }
        }
        Ok((geometry, layout))
    }
}

/// Read only the header of a table file.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<FileHeader> {
    let mut r = BufReader::new(File::open(path)?);
    FileHeader::read_from(&mut r)
}

struct Segments {
    table: Words,
    buckets: Words,
    positions: Words,
}

type Loaded = (FileHeader, TableGeometry, RecordLayout, Segments);

fn read_words<R: Read>(r: &mut R, n: u64) -> Result<Words> {
    let mut v = vec![0u64; n as usize];
    r.read_u64_into::<LE>(&mut v)?;
    Ok(v.into())
}

fn write_words<W: Write>(w: &mut W, words: &[u64]) -> std::io::Result<()> {
    for &x in words {
        w.write_u64::<LE>(x)?;
    }
    Ok(())
}

fn check_file_len(header: &FileHeader, actual: u64) -> Result<()> {
    if actual != header.file_len() {
        return Err(IndexError::Format(format!(
            "file is {actual} bytes, header describes {}",
            header.file_len()
        )));
    }
    Ok(())
}

fn load_owned(path: &Path, kind: TableKind) -> Result<Loaded> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();
    let mut r = BufReader::new(file);
    let header = FileHeader::read_from(&mut r)?;
    let (geometry, layout) = header.validate(kind)?;
    check_file_len(&header, len)?;
    let segments = Segments {
        table: read_words(&mut r, header.table_words)?,
        buckets: read_words(&mut r, header.bucket_words)?,
        positions: read_words(&mut r, header.position_words)?,
    };
    Ok((header, geometry, layout, segments))
}

fn load_mapped(path: &Path, kind: TableKind) -> Result<Loaded> {
    if cfg!(target_endian = "big") {
        return Err(IndexError::Format(
            "memory-mapped tables need a little-endian host; use load".into(),
        ));
    }
    let file = File::open(path)?;
    let header = FileHeader::read_from(&mut BufReader::new(&file))?;
    let (geometry, layout) = header.validate(kind)?;
    check_file_len(&header, file.metadata()?.len())?;

    // SAFETY: the mapping is read-only and table files are not modified while open.
    let map = Arc::new(unsafe { memmap2::MmapOptions::new().map(&file)? });
    let mut at = HEADER_BYTES;
    let mut segment = |words: u64| {
        let w = Words::mapped(Arc::clone(&map), at, words);
        at += 8 * words;
        w
    };
    let segments = Segments {
        table: segment(header.table_words)?,
        buckets: segment(header.bucket_words)?,
        positions: segment(header.position_words)?,
    };
    Ok((header, geometry, layout, segments))
}

fn core_from(
    header: &FileHeader,
    geometry: TableGeometry,
    layout: RecordLayout,
    table: Words,
    buckets: Words,
) -> Result<BucketedTable> {
    let hw = header.hash_width;
    let last = get_value(&table, geometry.table_size() * hw as u64, hw);
    if last != header.distinct {
        return Err(IndexError::Format(format!(
            "bucket starts end at {last}, expected {} records",
            header.distinct
        )));
    }
    Ok(BucketedTable {
        geometry,
        layout,
        hash_width: hw,
        records: header.distinct,
        table,
        buckets,
    })
}

fn expect_mer_size(path: &Path, mer_size: usize) -> Result<FileHeader> {
    let header = read_header(path)?;
    if header.mer_size as usize != mer_size {
        return Err(IndexError::Config(format!(
            "{} holds {}-mers, expected {mer_size}-mers",
            path.display(),
            header.mer_size
        )));
    }
    Ok(header)
}

impl PositionDb {
    /// Header describing this table as it would be saved.
    pub fn header(&self) -> FileHeader {
        let core = &self.core;
        let mut flags = 0;
        if self.stats.list_entries > 0 {
            flags |= FLAG_LISTS;
        }
        if self.has_counts() {
            flags |= FLAG_COUNTS;
        }
        FileHeader {
            kind: TableKind::Positions,
            version: FORMAT_VERSION,
            flags,
            mer_size: core.geometry.mer_size() as u32,
            table_bits: core.geometry.table_bits(),
            hash_width: core.hash_width,
            check_width: core.layout.check_width(),
            posn_width: self.posn_width,
            pptr_width: core.layout.pointer_width(),
            count_width: core.layout.count_width(),
            max_mismatch: self.max_mismatch(),
            total: self.stats.total,
            distinct: self.stats.distinct,
            unique: self.stats.unique,
            max_list_len: self.stats.max_list_len,
            list_entries: self.stats.list_entries,
            table_words: core.table.len() as u64,
            bucket_words: core.buckets.len() as u64,
            position_words: self.positions.len() as u64,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path)?);
        self.header().write_to(&mut w)?;
        write_words(&mut w, &self.core.table)?;
        write_words(&mut w, &self.core.buckets)?;
        write_words(&mut w, &self.positions)?;
        w.flush()?;
        log::info!("wrote {} ({} bytes)", path.display(), self.header().file_len());
        Ok(())
    }

    /// Read a table into memory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_parts(load_owned(path.as_ref(), TableKind::Positions)?)
    }

    /// Map a table file without copying it.
    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_parts(load_mapped(path.as_ref(), TableKind::Positions)?)
    }

    /// [`load`](Self::load), failing with a configuration error if the file
    /// holds mers of another size.
    pub fn load_expecting<P: AsRef<Path>>(path: P, mer_size: usize) -> Result<Self> {
        expect_mer_size(path.as_ref(), mer_size)?;
        Self::load(path)
    }

    /// [`load_expecting`](Self::load_expecting), also failing if the table's
    /// stored plan serves fewer than `max_mismatch` mismatches.
    pub fn load_for<P: AsRef<Path>>(path: P, mer_size: usize, max_mismatch: u32) -> Result<Self> {
        let path = path.as_ref();
        let header = expect_mer_size(path, mer_size)?;
        if header.max_mismatch < max_mismatch {
            return Err(IndexError::Config(format!(
                "{} was built for {} mismatches, {max_mismatch} needed",
                path.display(),
                header.max_mismatch
            )));
        }
        Self::load(path)
    }

    fn from_parts((header, geometry, layout, seg): Loaded) -> Result<Self> {
        let mismatch = MismatchPlan::new(&geometry, header.max_mismatch)?;
        Ok(PositionDb {
            core: core_from(&header, geometry, layout, seg.table, seg.buckets)?,
            posn_width: header.posn_width,
            stats: DbStats {
                total: header.total,
                distinct: header.distinct,
                unique: header.unique,
                list_entries: header.list_entries,
                max_list_len: header.max_list_len,
            },
            positions: seg.positions,
            mismatch,
        })
    }
}

impl ExistDb {
    pub fn header(&self) -> FileHeader {
        let core = &self.core;
        let mut flags = 0;
        if self.stores_counts() {
            flags |= FLAG_COUNTS;
        }
        if self.canonical {
            flags |= FLAG_CANONICAL;
        }
        FileHeader {
            kind: TableKind::Existence,
            version: FORMAT_VERSION,
            flags,
            mer_size: core.geometry.mer_size() as u32,
            table_bits: core.geometry.table_bits(),
            hash_width: core.hash_width,
            check_width: core.layout.check_width(),
            posn_width: 0,
            pptr_width: 0,
            count_width: core.layout.count_width(),
            max_mismatch: 0,
            total: self.stats.inserted,
            distinct: self.stats.distinct,
            unique: 0,
            max_list_len: self.stats.max_count,
            list_entries: 0,
            table_words: core.table.len() as u64,
            bucket_words: core.buckets.len() as u64,
            position_words: 0,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path)?);
        self.header().write_to(&mut w)?;
        write_words(&mut w, &self.core.table)?;
        write_words(&mut w, &self.core.buckets)?;
        w.flush()?;
        log::info!("wrote {} ({} bytes)", path.display(), self.header().file_len());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_parts(load_owned(path.as_ref(), TableKind::Existence)?)
    }

    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_parts(load_mapped(path.as_ref(), TableKind::Existence)?)
    }

    pub fn load_expecting<P: AsRef<Path>>(path: P, mer_size: usize) -> Result<Self> {
        expect_mer_size(path.as_ref(), mer_size)?;
        Self::load(path)
    }

    fn from_parts((header, geometry, layout, seg): Loaded) -> Result<Self> {
        Ok(ExistDb {
            core: core_from(&header, geometry, layout, seg.table, seg.buckets)?,
            canonical: header.is_canonical(),
            stats: ExistStats {
                inserted: header.total,
                distinct: header.distinct,
                max_count: header.max_list_len,
            },
        })
    }
}
