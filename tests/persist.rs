use std::io::Write;

use kmer_posdb::*;
use tempfile::TempDir;

fn sample_db() -> PositionDb {
    let input: Vec<_> = (0..400u64)
        .map(|i| MerOccurrence {
            mer: (i * 101) % 700,
            position: i * 3,
        })
        .collect();
    let cfg = BuildConfig::default().table_bits(6).max_mismatch(1);
    build_position_db(&mut SliceStream::new(&input), 5, &cfg).unwrap()
}

fn all_mers(db: &PositionDb) -> Vec<(u64, u64)> {
    let mut v = Vec::new();
    db.for_each_mer(|m, c| v.push((m, c))).unwrap();
    v
}

#[test]
fn test_position_db_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.kpos");
    let db = sample_db();
    db.save(&path).unwrap();

    let header = read_header(&path).unwrap();
    assert_eq!(header.kind, TableKind::Positions);
    assert_eq!(header.mer_size, 5);
    assert_eq!(header.distinct, db.stats().distinct);
    assert_eq!(header.max_mismatch, 1);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), header.file_len());

    let loaded = PositionDb::load(&path).unwrap();
    let mapped = PositionDb::open_mmap(&path).unwrap();
    assert!(!loaded.is_mapped());
    assert!(mapped.is_mapped());
    assert_eq!(loaded.max_mismatch(), 1);
    assert_eq!(mapped.max_mismatch(), 1);
    assert_eq!(loaded.stats(), db.stats());
    assert_eq!(mapped.header(), db.header());
    assert_eq!(all_mers(&loaded), all_mers(&db));
    assert_eq!(all_mers(&mapped), all_mers(&db));

    let (mut a, mut b) = (PositionBuffer::new(), PositionBuffer::new());
    for q in 0..1024u64 {
        db.get(q, &mut a).unwrap();
        mapped.get(q, &mut b).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
        mapped.get_mismatch(q, 1, &mut b).unwrap();
        db.get_mismatch(q, 1, &mut a).unwrap();
        assert_eq!(a.as_slice(), b.as_slice());
    }
}

#[test]
fn test_exist_db_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.kexi");
    let items: Vec<_> = (0..300u64)
        .map(|i| MerCount {
            mer: (i * 13) % 4096,
            count: i % 17,
        })
        .collect();
    let cfg = ExistConfig::default()
        .table_bits(7)
        .store_counts(true)
        .count_range(1, u64::MAX);
    let db = build_exist_db(&mut SliceStream::new(&items), 6, &cfg).unwrap();
    db.save(&path).unwrap();

    for loaded in [ExistDb::load(&path).unwrap(), ExistDb::open_mmap(&path).unwrap()] {
        assert_eq!(loaded.stats(), db.stats());
        assert!(loaded.stores_counts());
        for it in &items {
            assert_eq!(loaded.count(it.mer).unwrap(), db.count(it.mer).unwrap());
        }
    }
    assert!(matches!(PositionDb::load(&path), Err(IndexError::Format(_))));
}

#[test]
fn test_load_expecting_mer_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.kpos");
    sample_db().save(&path).unwrap();
    assert!(PositionDb::load_expecting(&path, 5).is_ok());
    assert!(matches!(
        PositionDb::load_expecting(&path, 6),
        Err(IndexError::Config(_))
    ));

    assert_eq!(PositionDb::load_for(&path, 5, 1).unwrap().max_mismatch(), 1);
    assert!(PositionDb::load_for(&path, 5, 0).is_ok());
    assert!(matches!(
        PositionDb::load_for(&path, 5, 2),
        Err(IndexError::Config(_))
    ));
}

#[test]
fn test_counts_survive_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counted.kpos");
    let input: Vec<_> = (0..64u64)
        .map(|i| MerOccurrence {
            mer: i % 40,
            position: i,
        })
        .collect();
    let counts: Vec<_> = (0..40u64)
        .map(|mer| MerCount {
            mer,
            count: mer * 3,
        })
        .collect();
    let mut db = build_position_db_with_counts(
        &mut SliceStream::new(&input),
        &mut SliceStream::new(&counts),
        4,
        &BuildConfig::default().table_bits(3),
    )
    .unwrap();
    db.save(&path).unwrap();
    assert!(read_header(&path).unwrap().stores_counts());

    let mut loaded = PositionDb::load(&path).unwrap();
    let mapped = PositionDb::open_mmap(&path).unwrap();
    for mer in 0..40u64 {
        assert_eq!(loaded.get_count(mer).unwrap(), db.get_count(mer).unwrap());
        assert_eq!(mapped.get_count(mer).unwrap(), db.get_count(mer).unwrap());
    }
    assert!(loaded.set_count(7, 1).unwrap());
    assert_eq!(loaded.get_count(7).unwrap(), 1);
    assert!(db.set_count(7, 2).unwrap());

    let mut mapped = mapped;
    assert!(matches!(mapped.set_count(7, 1), Err(IndexError::Config(_))));
}

#[test]
fn test_canonical_filter_probes_canonical_form() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filter.kexi");
    let aaaaaa = encode_kmer(b"AAAAAA").unwrap();
    let tttttt = encode_kmer(b"TTTTTT").unwrap();
    let cccccc = encode_kmer(b"CCCCCC").unwrap();
    let listed = [MerCount { mer: aaaaaa, count: 1 }];
    let filter = build_exist_db(
        &mut SliceStream::new(&listed),
        6,
        &ExistConfig::default().table_bits(4),
    )
    .unwrap();
    filter.save(&path).unwrap();

    // mark the saved table as holding canonical mers; flags follow magic and version
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[12] |= 4;
    std::fs::write(&path, &bytes).unwrap();
    let canonical_filter = ExistDb::load(&path).unwrap();
    assert!(canonical_filter.is_canonical());
    assert!(!filter.is_canonical());

    let input = [
        MerOccurrence { mer: tttttt, position: 0 },
        MerOccurrence { mer: cccccc, position: 1 },
    ];
    let build = |db: &ExistDb| {
        let cfg = BuildConfig::default().table_bits(5).mask(db);
        build_position_db(&mut SliceStream::new(&input), 6, &cfg).unwrap()
    };
    // TTTTTT is probed as AAAAAA only when the filter is canonical
    let masked = build(&canonical_filter);
    assert!(!masked.exists(tttttt).unwrap());
    assert!(masked.exists(cccccc).unwrap());
    let plain = build(&filter);
    assert!(plain.exists(tttttt).unwrap());
}

#[test]
fn test_truncated_and_foreign_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sample.kpos");
    sample_db().save(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let cut = dir.path().join("cut.kpos");
    std::fs::write(&cut, &bytes[..bytes.len() - 8]).unwrap();
    assert!(matches!(PositionDb::load(&cut), Err(IndexError::Format(_))));
    assert!(matches!(PositionDb::open_mmap(&cut), Err(IndexError::Format(_))));

    let foreign = dir.path().join("foreign.bin");
    let mut f = std::fs::File::create(&foreign).unwrap();
    f.write_all(&[0x42u8; 200]).unwrap();
    drop(f);
    assert!(matches!(read_header(&foreign), Err(IndexError::Format(_))));

    let missing = dir.path().join("missing.kpos");
    assert!(matches!(PositionDb::load(&missing), Err(IndexError::Io(_))));
}
