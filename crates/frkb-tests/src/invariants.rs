//! Quantified invariants checked at quiescent states.

#[cfg(test)]
mod tests {
    use crate::harness::Harness;
    use frkb_engine::CheckReason;
    use frkb_store::{collection_hash, FingerprintStore};

    /// P1/P2: count and hash match storage after every mutation.
    #[test]
    fn test_meta_matches_storage_after_each_mutation() {
        let h = Harness::new();
        let user = Harness::user();

        h.upload(0..100);
        h.assert_meta_invariants();

        h.upload(100..150);
        h.assert_meta_invariants();

        // Overlapping re-upload mutates nothing but still refreshes.
        h.upload(120..180);
        h.assert_meta_invariants();
        assert_eq!(h.fingerprints.count(&user).unwrap(), 180);
    }

    /// P3: a successful add is immediately visible to check.
    #[test]
    fn test_add_visible_to_next_check() {
        let h = Harness::new();
        let user = Harness::user();

        h.upload(0..50);
        let stored = h.fingerprints.enumerate(&user).unwrap();
        assert!(stored.contains(&Harness::fp(25)));

        let check = h
            .engine
            .check(&user, 50, &collection_hash(&stored))
            .unwrap();
        assert_eq!(check.reason, CheckReason::AlreadySynced);
        assert!(!check.need_sync);
    }

    /// P4: pages are disjoint and their union is the sorted missing set.
    #[test]
    fn test_pages_partition_missing_set() {
        let mut config = frkb_engine::SyncConfig::default();
        config.page_size = 7;
        let h = Harness::with_config(config);
        let user = Harness::user();
        h.upload(0..50);

        let analyze = h.engine.analyze_difference(&user, &[]).unwrap();
        let total_pages = analyze.diff_stats.total_pages;
        assert_eq!(total_pages, 8);

        let mut seen = std::collections::HashSet::new();
        let mut union = Vec::new();
        for page in 0..total_pages {
            let out = h
                .engine
                .pull_diff_page(&user, &analyze.diff_session_id, page)
                .unwrap();
            for fp in &out.missing_fingerprints {
                assert!(seen.insert(fp.clone()), "pages overlap at {fp}");
            }
            union.extend(out.missing_fingerprints);
        }

        let mut expected: Vec<_> = (0..50).map(Harness::fp).collect();
        expected.sort();
        assert_eq!(union, expected);
    }

    /// P5: insertBatch twice equals insertBatch once.
    #[test]
    fn test_insert_batch_idempotent() {
        let h = Harness::new();
        let user = Harness::user();
        let batch: Vec<String> = (0..200).map(Harness::hex).collect();

        h.engine.batch_add(&user, &batch).unwrap();
        let snapshot = h.fingerprints.enumerate(&user).unwrap();

        h.engine.batch_add(&user, &batch).unwrap();
        assert_eq!(h.fingerprints.enumerate(&user).unwrap(), snapshot);
        h.assert_meta_invariants();
    }

    /// P6 (serialization half): racing write-path callers either succeed or
    /// are refused with SYNC_IN_PROGRESS, never interleaved, and no lock
    /// survives the race.
    #[test]
    fn test_write_paths_serialize_per_user() {
        let h = std::sync::Arc::new(Harness::new());
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(4));

        std::thread::scope(|scope| {
            for t in 0..4u32 {
                let h = h.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    let batch: Vec<String> =
                        (t * 100..(t + 1) * 100).map(Harness::hex).collect();
                    barrier.wait();
                    match h.engine.batch_add(&Harness::user(), &batch) {
                        Ok(out) => assert_eq!(out.added_count, 100),
                        Err(err) => assert_eq!(err.code(), "SYNC_IN_PROGRESS"),
                    }
                });
            }
        });

        // Whatever the interleaving, the lock is free and meta agrees with
        // storage afterwards.
        let status = h.engine.sync_status(&Harness::user()).unwrap();
        assert!(status.sync_lock.is_none());
        h.assert_meta_invariants();
    }

    /// Error paths release the lock before propagating.
    #[test]
    fn test_failed_add_leaves_no_lock() {
        let h = Harness::new();
        let user = Harness::user();

        let err = h
            .engine
            .batch_add(&user, &[Harness::hex(1), Harness::hex(1)])
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(h.engine.sync_status(&user).unwrap().sync_lock.is_none());

        h.engine.batch_add(&user, &[Harness::hex(1)]).unwrap();
    }

    /// P7: bloom "not possible" implies absent from storage.
    #[test]
    fn test_bloom_negative_is_authoritative() {
        let h = Harness::new();
        let user = Harness::user();
        h.upload(0..500);

        // Drive the bloom layer through the diff path: batch 1 avoids the
        // advisory-session branch.
        let probes: Vec<String> = (10_000..10_200).map(Harness::hex).collect();
        let out = h
            .engine
            .bidirectional_diff(&user, &probes, 1, 1000)
            .unwrap();

        let stats = out.bloom_filter_stats.expect("bloom enabled");
        // Every definitely-absent candidate must truly be absent.
        assert_eq!(
            stats.definitely_absent + stats.maybe_present,
            probes.len() as u64
        );
        for fp in &out.server_existing_fingerprints {
            let present = h.fingerprints.existing(&user, &[fp.clone()]).unwrap();
            assert!(!present.is_empty());
        }
        // All probes are genuinely absent, so the server-missing list is the
        // whole batch regardless of what the filter guessed.
        assert_eq!(out.server_missing_fingerprints.len(), probes.len());
    }
}
