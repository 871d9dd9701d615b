//! Compact k-mer position tables.
//!
//! A [`PositionDb`] maps every fixed-length mer (k <= 32, 2 bits per base) of
//! a sequence collection to the positions where it occurs. An [`ExistDb`]
//! records only whether, and optionally how often, a mer occurs. Both share
//! one layout: the low `table_bits` bits of a mer select a bucket, a packed
//! prefix-sum table gives each bucket's record range, and each record stores
//! the remaining high bits as a check value. Every field is bit-packed at the
//! narrowest width the data allows.
//!
//! Mers are LSB-aligned codes as produced by [`encode_kmer`]. Tables are
//! built in two passes over a rewindable [`MerStream`] and can be shared by
//! any number of reader threads, each with its own [`PositionBuffer`]. Only
//! the optional per-mer counts of a position table can change after the
//! build, through `&mut`.
//!
//! ```
//! use kmer_posdb::{
//!     BuildConfig, MerOccurrence, PositionBuffer, SliceStream, build_position_db, encode_kmer,
//! };
//!
//! let aaaa = encode_kmer(b"AAAA").unwrap();
//! let input = [
//!     MerOccurrence { mer: aaaa, position: 0 },
//!     MerOccurrence { mer: aaaa, position: 5 },
//! ];
//! let cfg = BuildConfig::default().table_bits(2);
//! let db = build_position_db(&mut SliceStream::new(&input), 4, &cfg)?;
//! let mut buf = PositionBuffer::new();
//! db.get(aaaa, &mut buf)?;
//! assert_eq!(buf.as_slice(), &[0, 5]);
//! # Ok::<(), kmer_posdb::IndexError>(())
//! ```

pub mod bits;
mod bucket;
mod builder;
pub mod encode;
mod error;
mod exist_db;
pub mod io;
pub mod logging;
mod mismatch;
mod position_db;
mod radix;
mod storage;
mod stream;
mod table;

pub use bucket::{BucketRecord, RecordLayout, RecordValue};
pub use builder::{BuildConfig, build_position_db, build_position_db_with_counts};
pub use encode::{canonical, decode_kmer, encode_kmer, revcomp};
pub use error::{IndexError, Result};
pub use exist_db::{ExistConfig, ExistDb, ExistStats, InsertMode, build_exist_db};
pub use io::{FileHeader, TableKind, read_header};
pub use mismatch::MismatchPlan;
pub use position_db::{DbStats, PositionBuffer, PositionDb};
pub use stream::{MerCount, MerOccurrence, MerStream, SliceStream};
pub use table::{MAX_TABLE_BITS, TableGeometry};
