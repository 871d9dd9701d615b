//! Bucketed hash table core shared by the position and existence tables.
//!
//! `table` holds `table_size + 1` prefix-sum entries of `hash_width` bits:
//! bucket `h` owns records `table[h]..table[h + 1]` of `buckets`. Records are
//! fixed-width and bit-packed. Position tables pack `[check | pointer | unique]`
//! per distinct mer, followed by `[count]` when external counts are loaded;
//! existence tables pack `[check]` or `[check | count]`.
//! Buckets are short and unsorted; lookups scan them linearly.

use std::ops::Range;

use crate::bits::{get_value, get_values, mask, set_value, set_values};
use crate::error::{IndexError, Result};
use crate::storage::Words;
use crate::table::TableGeometry;

/// Decoded value part of a bucket record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordValue {
    /// The mer occurs once, at this position.
    Unique(u64),
    /// The mer occurs several times; value offset of its list in the position store.
    List(u64),
    /// Existence record carrying an occurrence count.
    Count(u64),
    /// Existence record without a count.
    Present,
}

/// One record of a bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketRecord {
    pub check: u64,
    pub value: RecordValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordKind {
    Position,
    Existence,
}

/// Field widths of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordLayout {
    kind: RecordKind,
    widths: [u32; 4],
    fields: usize,
}

impl RecordLayout {
    /// `[check | pointer | unique]`, plus `[count]` when `count_width > 0`.
    pub fn positions(check_width: u32, pointer_width: u32, count_width: u32) -> Self {
        Self {
            kind: RecordKind::Position,
            widths: [check_width, pointer_width, 1, count_width],
            fields: if count_width == 0 { 3 } else { 4 },
        }
    }

    /// `[check]` when `count_width == 0`, else `[check | count]`.
    pub fn existence(check_width: u32, count_width: u32) -> Self {
        Self {
            kind: RecordKind::Existence,
            widths: [check_width, count_width, 0, 0],
            fields: if count_width == 0 { 1 } else { 2 },
        }
    }

    /// Same layout with the count field resized; `0` drops it.
    pub fn with_count_width(&self, count_width: u32) -> Self {
        match self.kind {
            RecordKind::Position => Self::positions(self.widths[0], self.widths[1], count_width),
            RecordKind::Existence => Self::existence(self.widths[0], count_width),
        }
    }

    #[inline]
    pub fn check_width(&self) -> u32 {
        self.widths[0]
    }

    /// Width of the position/pointer field (0 for existence records).
    #[inline]
    pub fn pointer_width(&self) -> u32 {
        match self.kind {
            RecordKind::Position => self.widths[1],
            RecordKind::Existence => 0,
        }
    }

    /// Width of the count field (0 when records carry no count).
    #[inline]
    pub fn count_width(&self) -> u32 {
        match self.kind {
            RecordKind::Position if self.fields == 4 => self.widths[3],
            RecordKind::Position => 0,
            RecordKind::Existence => self.widths[1],
        }
    }

    /// Bit offset of the count field inside a record.
    #[inline]
    fn count_shift(&self) -> u64 {
        match self.kind {
            RecordKind::Position => (self.widths[0] + self.widths[1] + 1) as u64,
            RecordKind::Existence => self.widths[0] as u64,
        }
    }

    #[inline]
    pub fn record_width(&self) -> u32 {
        self.widths[..self.fields].iter().sum()
    }

    /// Bit offset of record `index`.
    #[inline]
    pub fn offset_of(&self, index: u64) -> u64 {
        index * self.record_width() as u64
    }

    /// Only the check value of record `index`.
    #[inline]
    pub fn read_check(&self, words: &[u64], index: u64) -> u64 {
        get_value(words, self.offset_of(index), self.widths[0])
    }

    /// Decode record `index`.
    #[inline]
    pub fn read(&self, words: &[u64], index: u64) -> BucketRecord {
        let mut vals = [0u64; 4];
        get_values(
            words,
            self.offset_of(index),
            &self.widths[..self.fields],
            &mut vals,
        );
        let value = match self.kind {
            RecordKind::Position if vals[2] == 1 => RecordValue::Unique(vals[1]),
            RecordKind::Position => RecordValue::List(vals[1]),
            RecordKind::Existence if self.fields == 2 => RecordValue::Count(vals[1]),
            RecordKind::Existence => RecordValue::Present,
        };
        BucketRecord {
            check: vals[0],
            value,
        }
    }

    /// Encode `record` as record `index`. A position record's count field
    /// is cleared; see [`write_count`](Self::write_count).
    pub fn write(&self, words: &mut [u64], index: u64, record: &BucketRecord) -> Result<()> {
        let vals = match (self.kind, record.value) {
            (RecordKind::Position, RecordValue::Unique(p)) => [record.check, p, 1, 0],
            (RecordKind::Position, RecordValue::List(off)) => [record.check, off, 0, 0],
            (RecordKind::Existence, RecordValue::Count(c)) => [record.check, c, 0, 0],
            (RecordKind::Existence, RecordValue::Present) => [record.check, 0, 0, 0],
            (kind, value) => {
                return Err(IndexError::Config(format!(
                    "{value:?} cannot be stored in a {kind:?} record"
                )));
            }
        };
        set_values(
            words,
            self.offset_of(index),
            &self.widths[..self.fields],
            &vals,
        );
        Ok(())
    }

    /// Count field of record `index`, `None` if the layout has none.
    #[inline]
    pub fn read_count(&self, words: &[u64], index: u64) -> Option<u64> {
        let width = self.count_width();
        (width > 0).then(|| get_value(words, self.offset_of(index) + self.count_shift(), width))
    }

    /// Store `count` in record `index`, saturating at the field's largest
    /// value. Returns the stored value.
    pub fn write_count(&self, words: &mut [u64], index: u64, count: u64) -> Result<u64> {
        let width = self.count_width();
        if width == 0 {
            return Err(IndexError::Config("records carry no count field".into()));
        }
        let stored = count.min(mask(width));
        set_value(words, self.offset_of(index) + self.count_shift(), width, stored);
        Ok(stored)
    }
}

/// Prefix-sum table plus packed records.
pub(crate) struct BucketedTable {
    pub(crate) geometry: TableGeometry,
    pub(crate) layout: RecordLayout,
    pub(crate) hash_width: u32,
    pub(crate) records: u64,
    pub(crate) table: Words,
    pub(crate) buckets: Words,
}

impl BucketedTable {
    /// Record range of bucket `hash`.
    pub(crate) fn bucket_range(&self, hash: u64) -> Result<Range<u64>> {
        let hw = self.hash_width as u64;
        let start = get_value(&self.table, hash * hw, self.hash_width);
        let end = get_value(&self.table, (hash + 1) * hw, self.hash_width);
        if end < start || end > self.records {
            return Err(IndexError::Corrupt(format!(
                "bucket {hash} spans {start}..{end} with {} records",
                self.records
            )));
        }
        Ok(start..end)
    }

    #[inline]
    pub(crate) fn read(&self, index: u64) -> BucketRecord {
        self.layout.read(&self.buckets, index)
    }

    /// Index of the record holding `mer`, if stored.
    pub(crate) fn find_index(&self, mer: u64) -> Result<Option<u64>> {
        let check = self.geometry.check(mer);
        for i in self.bucket_range(self.geometry.hash(mer))? {
            if self.layout.read_check(&self.buckets, i) == check {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Record of `mer`, if stored.
    #[inline]
    pub(crate) fn find(&self, mer: u64) -> Result<Option<BucketRecord>> {
        Ok(self.find_index(mer)?.map(|i| self.read(i)))
    }

    pub(crate) fn size_in_bytes(&self) -> usize {
        8 * (self.table.len() + self.buckets.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::words_for_bits;

    #[test]
    fn position_records() {
        let layout = RecordLayout::positions(13, 9, 0);
        assert_eq!(layout.record_width(), 23);
        let mut words = vec![0u64; words_for_bits(10 * 23)];
        let a = BucketRecord {
            check: 0x1abc,
            value: RecordValue::Unique(300),
        };
        let b = BucketRecord {
            check: 7,
            value: RecordValue::List(511),
        };
        layout.write(&mut words, 2, &a).unwrap();
        layout.write(&mut words, 3, &b).unwrap();
        assert_eq!(layout.read(&words, 2), a);
        assert_eq!(layout.read(&words, 3), b);
        assert_eq!(layout.read_check(&words, 3), 7);
    }

    #[test]
    fn existence_records() {
        let plain = RecordLayout::existence(30, 0);
        assert_eq!(plain.record_width(), 30);
        let counted = RecordLayout::existence(30, 5);
        let mut words = vec![0u64; 4];
        let r = BucketRecord {
            check: 12345,
            value: RecordValue::Count(17),
        };
        counted.write(&mut words, 1, &r).unwrap();
        assert_eq!(counted.read(&words, 1), r);
        plain
            .write(
                &mut words,
                5,
                &BucketRecord {
                    check: 9,
                    value: RecordValue::Present,
                },
            )
            .unwrap();
        assert_eq!(plain.read(&words, 5).value, RecordValue::Present);
        assert_eq!(plain.read_count(&words, 5), None);
    }

    #[test]
    fn position_records_with_counts() {
        let layout = RecordLayout::positions(10, 6, 4);
        assert_eq!(layout.record_width(), 21);
        assert_eq!(layout.count_width(), 4);
        let mut words = vec![0u64; words_for_bits(4 * 21)];
        let r = BucketRecord {
            check: 0x3ff,
            value: RecordValue::List(17),
        };
        layout.write(&mut words, 1, &r).unwrap();
        assert_eq!(layout.read_count(&words, 1), Some(0));
        assert_eq!(layout.write_count(&mut words, 1, 9).unwrap(), 9);
        // the count sits past the unique flag and leaves the record intact
        assert_eq!(layout.read(&words, 1), r);
        assert_eq!(layout.read_count(&words, 1), Some(9));
        // saturates at 4 bits
        assert_eq!(layout.write_count(&mut words, 1, 300).unwrap(), 15);
        assert_eq!(layout.read_count(&words, 0), Some(0));
        assert_eq!(layout.read_count(&words, 2), Some(0));

        let plain = layout.with_count_width(0);
        assert_eq!(plain, RecordLayout::positions(10, 6, 0));
        assert!(plain.write_count(&mut words, 0, 1).is_err());
    }

    #[test]
    fn mismatched_value_kind_is_rejected() {
        let mut words = vec![0u64; 2];
        let unique = BucketRecord {
            check: 1,
            value: RecordValue::Unique(3),
        };
        let present = BucketRecord {
            check: 1,
            value: RecordValue::Present,
        };
        let existence = RecordLayout::existence(8, 0);
        let positions = RecordLayout::positions(8, 4, 0);
        assert!(matches!(existence.write(&mut words, 0, &unique), Err(IndexError::Config(_))));
        assert!(matches!(positions.write(&mut words, 0, &present), Err(IndexError::Config(_))));
        assert_eq!(words, vec![0, 0]);
    }
}
