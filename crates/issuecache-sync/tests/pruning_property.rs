//! Whatever sequence of passes runs, the issue set is only ever replaced by a
//! full pass, and only with every number that pass fetched.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::*;
use issuecache_store::SqliteStore;
use issuecache_sync::{ProgressSender, SyncMode, SyncRequest};
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn replace_issue_set_only_follows_full_passes(
        forced in proptest::collection::vec(any::<bool>(), 1..5),
        remote in proptest::collection::btree_set(1u64..200, 0..20),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (modes, replaced) = runtime.block_on(async {
            let server = MockServer::start().await;
            let repo = widgets();
            let page = remote.iter().map(|&n| issue_json(n, 0)).collect();
            mount_issue_pages(&server, &repo, vec![page]).await;

            let store = Arc::new(RecordingStore::new(SqliteStore::open_in_memory().unwrap()));
            let engine = engine(&server, Arc::clone(&store), ts(60));
            let cancel = CancellationToken::new();

            let mut modes = Vec::new();
            for &force_full in &forced {
                let request = SyncRequest { repo: repo.clone(), force_full };
                let report = engine
                    .sync(request, &cancel, &ProgressSender::disabled())
                    .await
                    .unwrap();
                modes.push(report.mode);
            }
            (modes, store.replace_issue_set_calls())
        });

        let full_passes = modes.iter().filter(|m| matches!(m, SyncMode::Full)).count();
        prop_assert_eq!(replaced.len(), full_passes);
        prop_assert!(replaced.iter().all(|set| set == &remote));

        // first pass has no watermark, later ones are full only when forced
        prop_assert_eq!(modes[0], SyncMode::Full);
        for (mode, &force) in modes.iter().zip(&forced).skip(1) {
            prop_assert_eq!(mode.is_full(), force);
        }
    }
}
