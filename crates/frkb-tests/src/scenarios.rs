//! End-to-end sync scenarios with literal values.

#[cfg(test)]
mod tests {
    use crate::harness::Harness;
    use frkb_engine::CheckReason;
    use frkb_store::{now_secs, DiffSession, Fingerprint, FingerprintStore, SessionStore};

    /// First upload: 2500 fingerprints in chunks of 1000/1000/500, checking
    /// between chunks.
    #[test]
    fn test_first_upload() {
        let h = Harness::new();
        let user = Harness::user();

        let first: Vec<String> = (0..1000).map(Harness::hex).collect();
        let second: Vec<String> = (1000..2000).map(Harness::hex).collect();
        let third: Vec<String> = (2000..2500).map(Harness::hex).collect();

        let out = h.engine.batch_add(&user, &first).unwrap();
        assert_eq!(out.added_count, 1000);
        let check = h
            .engine
            .check(&user, 2500, &Harness::hash_of(0..2500))
            .unwrap();
        assert_eq!(check.reason, CheckReason::CountMismatch);
        assert!(check.need_sync);

        let out = h.engine.batch_add(&user, &second).unwrap();
        assert_eq!(out.added_count, 1000);
        let check = h
            .engine
            .check(&user, 2500, &Harness::hash_of(0..2500))
            .unwrap();
        assert_eq!(check.reason, CheckReason::CountMismatch);

        let out = h.engine.batch_add(&user, &third).unwrap();
        assert_eq!(out.added_count, 500);
        let check = h
            .engine
            .check(&user, 2500, &Harness::hash_of(0..2500))
            .unwrap();
        assert_eq!(check.reason, CheckReason::AlreadySynced);
        assert!(!check.need_sync);

        h.assert_meta_invariants();
    }

    /// Idempotent add: resubmitting all 2500 changes nothing.
    #[test]
    fn test_idempotent_resubmission() {
        let h = Harness::new();
        let user = Harness::user();
        h.upload(0..2500);

        // One batch per chunk; the add path caps batches at 1000.
        let mut added = 0;
        let mut duplicates = 0;
        let all: Vec<u32> = (0..2500).collect();
        for chunk in all.chunks(1000) {
            let batch: Vec<String> = chunk.iter().map(|i| Harness::hex(*i)).collect();
            let out = h.engine.batch_add(&user, &batch).unwrap();
            added += out.added_count;
            duplicates += out.duplicate_count;
        }

        assert_eq!(added, 0);
        assert_eq!(duplicates, 2500);
        assert_eq!(h.fingerprints.count(&user).unwrap(), 2500);
        h.assert_meta_invariants();
    }

    /// Whole-set diff and pagination: an empty client pulls all 2500 in
    /// sorted order across three pages.
    #[test]
    fn test_whole_set_diff_and_pagination() {
        let h = Harness::new();
        let user = Harness::user();
        h.upload(0..2500);

        let analyze = h.engine.analyze_difference(&user, &[]).unwrap();
        assert_eq!(analyze.diff_stats.client_missing_count, 2500);
        assert_eq!(analyze.diff_stats.server_missing_count, 0);
        assert_eq!(analyze.diff_stats.total_pages, 3);

        let mut pulled = Vec::new();
        for page in 0..3 {
            let out = h
                .engine
                .pull_diff_page(&user, &analyze.diff_session_id, page)
                .unwrap();
            let expected_len = if page == 2 { 500 } else { 1000 };
            assert_eq!(out.missing_fingerprints.len(), expected_len);
            pulled.extend(out.missing_fingerprints);
        }

        let mut expected: Vec<Fingerprint> = (0..2500).map(Harness::fp).collect();
        expected.sort();
        assert_eq!(pulled, expected);
    }

    /// Stale cache tie-break: a row inserted behind the meta's back heals to
    /// already_synced via the refresh.
    #[test]
    fn test_stale_cache_tie_break() {
        let h = Harness::new();
        let user = Harness::user();
        h.upload(0..2500);
        // Warm the meta snapshot.
        h.engine
            .check(&user, 2500, &Harness::hash_of(0..2500))
            .unwrap();

        // Insert one extra fingerprint bypassing apply_delta.
        h.fingerprints
            .insert_batch(&user, &[Harness::fp(9999)], now_secs())
            .unwrap();

        let mut all: Vec<Fingerprint> = (0..2500).map(Harness::fp).collect();
        all.push(Harness::fp(9999));
        let true_hash = frkb_store::collection_hash(&all);

        // Counts equal per the stale snapshot, hashes differ: the tie-break
        // refresh notices agreement with live storage.
        let check = h.engine.check(&user, 2500, &true_hash).unwrap();
        assert_eq!(check.reason, CheckReason::AlreadySynced);
        assert!(!check.need_sync);
        assert_eq!(check.server_count, 2501);
        h.assert_meta_invariants();
    }

    /// Session expiry: a pull after the TTL fails with session-not-found.
    #[test]
    fn test_session_expiry() {
        let h = Harness::new();
        let user = Harness::user();
        h.upload(0..10);

        let analyze = h.engine.analyze_difference(&user, &[]).unwrap();

        // Advance the clock past the TTL by rewriting the session's stamps,
        // then drop the cached handle so the store answers.
        let session = h
            .sessions
            .find(&analyze.diff_session_id, now_secs())
            .unwrap()
            .unwrap();
        let expired = DiffSession {
            expires_at: now_secs().saturating_sub(1),
            ..session
        };
        h.sessions.create(expired).unwrap();
        h.engine.cache().remove_session(&analyze.diff_session_id);

        let err = h
            .engine
            .pull_diff_page(&user, &analyze.diff_session_id, 0)
            .unwrap_err();
        assert_eq!(err.code(), "DIFF_SESSION_NOT_FOUND");
        assert!(matches!(
            err,
            frkb_engine::SyncError::DiffSessionNotFound {
                retry_after_secs: 300,
                ..
            }
        ));
    }

    /// Concurrent adds with a 300-element overlap: serialization through the
    /// sync lock leaves exactly the union.
    #[test]
    fn test_concurrent_adds_converge_to_union() {
        let h = std::sync::Arc::new(Harness::new());
        let user = Harness::user();

        let batch_a: Vec<String> = (0..1000).map(Harness::hex).collect();
        let batch_b: Vec<String> = (700..1700).map(Harness::hex).collect();

        let mut outcomes = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = [batch_a, batch_b]
                .into_iter()
                .map(|batch| {
                    let h = h.clone();
                    scope.spawn(move || {
                        // The loser of the lock race retries until the winner
                        // finishes.
                        loop {
                            match h.engine.batch_add(&Harness::user(), &batch) {
                                Ok(out) => return out,
                                Err(err) if err.code() == "SYNC_IN_PROGRESS" => {
                                    std::thread::yield_now();
                                }
                                Err(err) => panic!("unexpected error: {err}"),
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                outcomes.push(handle.join().unwrap());
            }
        });

        assert_eq!(h.fingerprints.count(&user).unwrap(), 1700);
        let added: u64 = outcomes.iter().map(|o| o.added_count).sum();
        let total: u64 = outcomes
            .iter()
            .map(|o| o.added_count + o.duplicate_count)
            .sum();
        assert_eq!(added, 1700);
        assert_eq!(total, 2000);
        h.assert_meta_invariants();
    }
}
