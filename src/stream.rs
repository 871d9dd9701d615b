//! Rewindable mer streams feeding the two-pass builders.

use crate::error::Result;

/// One occurrence of a mer at a position of the sequence collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerOccurrence {
    pub mer: u64,
    pub position: u64,
}

/// A mer with an externally computed occurrence count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerCount {
    pub mer: u64,
    pub count: u64,
}

/// Source of items that can be read from the start more than once.
///
/// Builders call [`rewind`](MerStream::rewind) before every pass and expect
/// the same items each time, in any order.
pub trait MerStream {
    type Item;

    /// Restart from the first item.
    fn rewind(&mut self) -> Result<()>;

    /// Next item, `Ok(None)` at the end.
    fn next_item(&mut self) -> Result<Option<Self::Item>>;

    /// Estimated item count, used only to size tables automatically.
    fn approximate_len(&self) -> u64;
}

/// Stream over an in-memory slice.
pub struct SliceStream<'a, T> {
    items: &'a [T],
    at: usize,
}

impl<'a, T> SliceStream<'a, T> {
    pub fn new(items: &'a [T]) -> Self {
        Self { items, at: 0 }
    }
}

impl<T: Copy> MerStream for SliceStream<'_, T> {
    type Item = T;

    fn rewind(&mut self) -> Result<()> {
        self.at = 0;
        Ok(())
    }

    fn next_item(&mut self) -> Result<Option<T>> {
        let item = self.items.get(self.at).copied();
        if item.is_some() {
            self.at += 1;
        }
        Ok(item)
    }

    fn approximate_len(&self) -> u64 {
        self.items.len() as u64
    }
}
