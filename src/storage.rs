//! Backing store for the packed arrays: owned words or a region of a mapped file.

use std::ops::{Deref, Range};
use std::sync::Arc;

use crate::error::{IndexError, Result};

/// `u64` word array.
///
/// Tables are built into owned vectors; tables opened with
/// `open_mmap` borrow their segments from one shared, read-only mapping.
pub(crate) enum Words {
    Owned(Vec<u64>),
    Mapped {
        map: Arc<memmap2::Mmap>,
        bytes: Range<usize>,
    },
}

impl Words {
    /// Wrap `words` 64-bit words of `map` starting at byte `offset`.
    /// Fails if the region is out of bounds or not 8-byte aligned.
    pub(crate) fn mapped(map: Arc<memmap2::Mmap>, offset: u64, words: u64) -> Result<Self> {
        let start = offset as usize;
        let end = words
            .checked_mul(8)
            .and_then(|n| n.checked_add(offset))
            .ok_or_else(|| IndexError::Format("segment length overflows".into()))?
            as usize;
        if end > map.len() {
            return Err(IndexError::Format(format!(
                "segment {start}..{end} past end of file ({} bytes)",
                map.len()
            )));
        }
        bytemuck::try_cast_slice::<u8, u64>(&map[start..end])
            .map_err(|e| IndexError::Cast(format!("{e:?}")))?;
        Ok(Words::Mapped {
            map,
            bytes: start..end,
        })
    }

    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self, Words::Mapped { .. })
    }

    /// Writable view of owned words; mapped segments are read-only.
    pub(crate) fn as_mut_slice(&mut self) -> Result<&mut [u64]> {
        match self {
            Words::Owned(v) => Ok(v),
            Words::Mapped { .. } => Err(IndexError::Config(
                "memory-mapped tables are read-only; load the table to modify it".into(),
            )),
        }
    }
}

impl From<Vec<u64>> for Words {
    fn from(v: Vec<u64>) -> Self {
        Words::Owned(v)
    }
}

impl Deref for Words {
    type Target = [u64];

    fn deref(&self) -> &[u64] {
        match self {
            Words::Owned(v) => v,
            // alignment and bounds were checked in `mapped`
            Words::Mapped { map, bytes } => bytemuck::cast_slice(&map[bytes.clone()]),
        }
    }
}
