use kmer_posdb::bits::base_differences;
use kmer_posdb::*;

fn mer(s: &str) -> u64 {
    encode_kmer(s.as_bytes()).unwrap()
}

fn occ(s: &str, position: u64) -> MerOccurrence {
    MerOccurrence {
        mer: mer(s),
        position,
    }
}

fn build(input: &[MerOccurrence], k: usize, cfg: &BuildConfig<'_>) -> PositionDb {
    build_position_db(&mut SliceStream::new(input), k, cfg).unwrap()
}

fn sorted(buf: &PositionBuffer) -> Vec<u64> {
    let mut v = buf.to_vec();
    v.sort_unstable();
    v
}

#[test]
fn test_small_table_scenario() {
    let input = [occ("AAAA", 0), occ("AAAA", 5), occ("CCCC", 1)];
    let db = build(&input, 4, &BuildConfig::default().table_bits(2));
    let mut buf = PositionBuffer::new();

    assert_eq!(db.get(mer("AAAA"), &mut buf).unwrap(), 2);
    assert_eq!(buf.as_slice(), &[0, 5]);
    assert_eq!(db.count(mer("AAAA")).unwrap(), 2);
    assert!(db.exists(mer("CCCC")).unwrap());
    assert_eq!(db.count(mer("CCCC")).unwrap(), 1);
    assert!(!db.exists(mer("GGGG")).unwrap());
    assert_eq!(db.get(mer("GGGG"), &mut buf).unwrap(), 0);
    assert!(buf.is_empty());

    let stats = db.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.distinct, 2);
    assert_eq!(stats.unique, 1);
    assert_eq!(stats.max_list_len, 2);
    assert_eq!(stats.list_entries, 3);
}

#[test]
fn test_records_are_typed() {
    let input = [occ("AAAA", 0), occ("AAAA", 5), occ("CCCC", 1)];
    let db = build(&input, 4, &BuildConfig::default().table_bits(2));

    let a: Vec<_> = db.records(0).unwrap().collect();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].check, 0);
    assert_eq!(a[0].value, RecordValue::List(0));

    let c: Vec<_> = db.records(1).unwrap().collect();
    assert_eq!(c, vec![BucketRecord { check: 0b010101, value: RecordValue::Unique(1) }]);

    assert_eq!(db.bucket_range(2).unwrap(), 2..2);
    assert_eq!(db.bucket_range(3).unwrap(), 2..2);
}

#[test]
fn test_empty_stream() {
    let db = build(&[], 8, &BuildConfig::default().table_bits(6));
    let mut buf = PositionBuffer::new();
    assert_eq!(db.stats(), DbStats::default());
    assert_eq!(db.get(mer("ACGTACGT"), &mut buf).unwrap(), 0);
    let mut seen = 0;
    db.for_each_mer(|_, _| seen += 1).unwrap();
    assert_eq!(seen, 0);
}

#[test]
fn test_count_range_filter() {
    let input = [
        occ("ACGTA", 0),
        occ("ACGTA", 7),
        occ("ACGTA", 9),
        occ("CCGTA", 1),
        occ("GGGTA", 2),
        occ("GGGTA", 4),
    ];
    let db = build(&input, 5, &BuildConfig::default().table_bits(4).count_range(2, 2));
    assert_eq!(db.count(mer("ACGTA")).unwrap(), 0);
    assert_eq!(db.count(mer("CCGTA")).unwrap(), 0);
    assert_eq!(db.count(mer("GGGTA")).unwrap(), 2);
    assert_eq!(db.stats().distinct, 1);
    assert_eq!(db.stats().total, 2);

    let err = build_position_db(
        &mut SliceStream::new(&input),
        5,
        &BuildConfig::default().table_bits(4).count_range(3, 2),
    );
    assert!(matches!(err, Err(IndexError::Config(_))));
}

#[test]
fn test_mask_and_only_tables() {
    let input = [occ("ACGTAC", 0), occ("TTTTTT", 1), occ("GATTAC", 2), occ("GATTAC", 3)];
    let listed = [
        MerCount { mer: mer("ACGTAC"), count: 4 },
        MerCount { mer: mer("GATTAC"), count: 1 },
    ];
    let filter = build_exist_db(
        &mut SliceStream::new(&listed),
        6,
        &ExistConfig::default().table_bits(4),
    )
    .unwrap();

    let masked = build(&input, 6, &BuildConfig::default().table_bits(5).mask(&filter));
    assert!(!masked.exists(mer("ACGTAC")).unwrap());
    assert!(!masked.exists(mer("GATTAC")).unwrap());
    assert!(masked.exists(mer("TTTTTT")).unwrap());

    let only = build(&input, 6, &BuildConfig::default().table_bits(5).only(&filter));
    assert!(only.exists(mer("ACGTAC")).unwrap());
    assert_eq!(only.count(mer("GATTAC")).unwrap(), 2);
    assert!(!only.exists(mer("TTTTTT")).unwrap());

    let wrong_size = build_position_db(
        &mut SliceStream::new(&[occ("ACGTA", 0)]),
        5,
        &BuildConfig::default().table_bits(5).mask(&filter),
    );
    assert!(matches!(wrong_size, Err(IndexError::Config(_))));
}

#[test]
fn test_rejects_bad_geometry_and_positions() {
    let input = [occ("ACGT", 0)];
    for bits in [0, 8, 9] {
        let cfg = BuildConfig::default().table_bits(bits);
        let r = build_position_db(&mut SliceStream::new(&input), 4, &cfg);
        assert!(matches!(r, Err(IndexError::Config(_))), "table bits {bits}");
    }
    let far = [MerOccurrence { mer: mer("ACGT"), position: 1 << 61 }];
    let cfg = BuildConfig::default().table_bits(2);
    let r = build_position_db(&mut SliceStream::new(&far), 4, &cfg);
    assert!(matches!(r, Err(IndexError::Config(_))));
}

#[test]
fn test_automatic_table_size() {
    let seq = b"ACGTTGCAAACCGGTTACGTACGTAAAACCCCGATTACAGATTACA";
    let k = 12;
    let input: Vec<_> = seq
        .windows(k)
        .enumerate()
        .map(|(i, w)| MerOccurrence { mer: encode_kmer(w).unwrap(), position: i as u64 })
        .collect();
    let db = build(&input, k, &BuildConfig::default());
    let mut buf = PositionBuffer::new();
    for o in &input {
        db.get(o.mer, &mut buf).unwrap();
        assert!(buf.contains(&o.position));
    }
    assert_eq!(db.geometry().table_bits(), 16);
    assert_eq!(db.stats().total, input.len() as u64);
}

#[test]
fn test_lookup_batch_matches_get() {
    let input: Vec<_> = (0..500u64)
        .map(|i| MerOccurrence { mer: (i * 7919) % 4096, position: i })
        .collect();
    let db = build(&input, 6, &BuildConfig::default().table_bits(5));
    let queries: Vec<u64> = (0..4096).step_by(13).collect();
    let batch = db.lookup_batch(&queries).unwrap();
    let mut buf = PositionBuffer::new();
    for (q, got) in queries.iter().zip(&batch) {
        db.get(*q, &mut buf).unwrap();
        assert_eq!(got.as_slice(), buf.as_slice());
    }
}

#[test]
fn test_mismatch_against_brute_force() {
    let k = 5;
    let input: Vec<_> = (0..300u64)
        .map(|i| MerOccurrence { mer: (i * 37 + 11) % 1024, position: i })
        .collect();
    let mut buf = PositionBuffer::new();
    for bits in [3, 4, 7] {
        let db = build(&input, k, &BuildConfig::default().table_bits(bits).max_mismatch(3));
        for q in (0..1024u64).step_by(29) {
            for n in 0..=3u32 {
                let want: Vec<u64> = {
                    let mut v: Vec<u64> = input
                        .iter()
                        .filter(|o| base_differences(o.mer, q) == n)
                        .map(|o| o.position)
                        .collect();
                    v.sort_unstable();
                    v
                };
                let got = db.get_mismatch(q, n, &mut buf).unwrap();
                assert_eq!(got, want.len());
                assert_eq!(sorted(&buf), want, "bits {bits} query {q} n {n}");

                let within: Vec<u64> = {
                    let mut v: Vec<u64> = input
                        .iter()
                        .filter(|o| base_differences(o.mer, q) <= n)
                        .map(|o| o.position)
                        .collect();
                    v.sort_unstable();
                    v
                };
                db.get_up_to_n_mismatches(q, n, &mut buf).unwrap();
                assert_eq!(sorted(&buf), within);
            }
        }
    }
}

#[test]
fn test_mismatch_distance_boundary() {
    let input = [occ("ACGTACGT", 42)];
    let db = build(&input, 8, &BuildConfig::default().table_bits(6).max_mismatch(3));
    let mut buf = PositionBuffer::new();
    // three substitutions, one in the check portion
    let q = mer("TCGTAGGA");
    assert_eq!(db.get_mismatch(q, 3, &mut buf).unwrap(), 1);
    assert_eq!(buf.as_slice(), &[42]);
    assert_eq!(db.get_mismatch(q, 2, &mut buf).unwrap(), 0);
    assert!(matches!(db.get_mismatch(q, 9, &mut buf), Err(IndexError::Config(_))));

    let plan = db.mismatch_plan(3).unwrap();
    assert_eq!(db.get_mismatch_with(&plan, q, 3, &mut buf).unwrap(), 1);
    assert!(matches!(
        db.get_mismatch_with(&plan, q, 4, &mut buf),
        Err(IndexError::Config(_))
    ));
    let other = build(&input, 8, &BuildConfig::default().table_bits(4));
    assert!(other.get_mismatch_with(&plan, q, 3, &mut buf).is_err());
}

#[test]
fn test_mismatch_limit_is_fixed_at_build() {
    let input = [occ("ACGTACGT", 42), occ("ACGTACGA", 7)];
    let q = mer("ACGTACGA");
    let mut buf = PositionBuffer::new();

    let plain = build(&input, 8, &BuildConfig::default().table_bits(6));
    assert_eq!(plain.max_mismatch(), 0);
    assert_eq!(plain.get_mismatch(q, 0, &mut buf).unwrap(), 1);
    assert_eq!(plain.get_up_to_n_mismatches(q, 0, &mut buf).unwrap(), 1);
    assert!(matches!(plain.get_mismatch(q, 1, &mut buf), Err(IndexError::Config(_))));
    assert!(matches!(
        plain.get_up_to_n_mismatches(q, 1, &mut buf),
        Err(IndexError::Config(_))
    ));
    // a caller-built plan still reaches past the stored limit
    let plan = plain.mismatch_plan(1).unwrap();
    assert_eq!(plain.get_mismatch_with(&plan, q, 1, &mut buf).unwrap(), 1);
    assert_eq!(buf.as_slice(), &[42]);
    assert_eq!(plain.get_up_to_n_mismatches_with(&plan, q, 1, &mut buf).unwrap(), 2);

    let one = build(&input, 8, &BuildConfig::default().table_bits(6).max_mismatch(1));
    assert_eq!(one.max_mismatch(), 1);
    assert_eq!(one.get_up_to_n_mismatches(q, 1, &mut buf).unwrap(), 2);
    assert_eq!(sorted(&buf), vec![7, 42]);

    let too_many = build_position_db(
        &mut SliceStream::new(&input),
        8,
        &BuildConfig::default().table_bits(6).max_mismatch(9),
    );
    assert!(matches!(too_many, Err(IndexError::Config(_))));
}

#[test]
fn test_external_counts() {
    let input = [
        occ("AACCGT", 0),
        occ("AACCGT", 4),
        occ("GATTAC", 1),
        occ("TTTTTT", 2),
    ];
    // ACGGTT is the reverse complement of AACCGT; CCCCCC is not stored
    let counts = [
        MerCount { mer: mer("ACGGTT"), count: 11 },
        MerCount { mer: mer("GATTAC"), count: 3 },
        MerCount { mer: mer("CCCCCC"), count: 900 },
    ];
    let mut db = build_position_db_with_counts(
        &mut SliceStream::new(&input),
        &mut SliceStream::new(&counts),
        6,
        &BuildConfig::default().table_bits(4),
    )
    .unwrap();
    assert!(db.has_counts());
    // sized for 11, the largest count that matched a stored mer
    assert_eq!(db.layout().count_width(), 4);
    assert_eq!(db.get_count(mer("AACCGT")).unwrap(), 11);
    assert_eq!(db.get_count(mer("GATTAC")).unwrap(), 3);
    assert_eq!(db.get_count(mer("TTTTTT")).unwrap(), 0);
    assert_eq!(db.get_count(mer("CCCCCC")).unwrap(), 0);

    // positions are untouched by the count field
    let mut buf = PositionBuffer::new();
    assert_eq!(db.get(mer("AACCGT"), &mut buf).unwrap(), 2);
    assert_eq!(buf.as_slice(), &[0, 4]);
    assert_eq!(db.get(mer("TTTTTT"), &mut buf).unwrap(), 1);
    assert_eq!(db.count(mer("GATTAC")).unwrap(), 1);

    assert!(db.set_count(mer("TTTTTT"), 5).unwrap());
    assert_eq!(db.get_count(mer("TTTTTT")).unwrap(), 5);
    assert!(db.set_count(mer("GATTAC"), 1000).unwrap());
    assert_eq!(db.get_count(mer("GATTAC")).unwrap(), 15);
    assert!(!db.set_count(mer("CCCCCC"), 1).unwrap());

    let plain = build(&input, 6, &BuildConfig::default().table_bits(4));
    assert!(!plain.has_counts());
    assert!(matches!(plain.get_count(mer("GATTAC")), Err(IndexError::Config(_))));
}

#[test]
fn test_shared_across_threads() {
    let input: Vec<_> = (0..200u64)
        .map(|i| MerOccurrence { mer: (i * 31) % 256, position: i })
        .collect();
    let db = build(&input, 4, &BuildConfig::default().table_bits(3));
    std::thread::scope(|s| {
        for t in 0..4u64 {
            let db = &db;
            s.spawn(move || {
                let mut buf = PositionBuffer::new();
                for i in (t..200).step_by(4) {
                    db.get((i * 31) % 256, &mut buf).unwrap();
                    assert!(buf.contains(&i));
                }
            });
        }
    });
}
