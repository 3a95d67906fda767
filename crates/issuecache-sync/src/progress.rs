//! Progress events from the orchestrator to its caller.
//!
//! The channel is unbounded so a slow consumer never stalls a sync pass, and
//! a consumer that has gone away is simply ignored.

use issuecache_core::RepoId;
use tokio::sync::mpsc;

use crate::state::SyncPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Issues,
    Comments,
}

/// A progress tick. `fetched` never decreases within a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub repo: RepoId,
    pub phase: ProgressPhase,
    /// Issues reconciled so far, or comment threads refreshed so far.
    pub fetched: u64,
    /// Server-reported issue total when the transport has one; for comments,
    /// the number of threads scheduled.
    pub total: Option<u64>,
    /// Pages fetched in the current collection.
    pub page: u32,
    /// Continuation of the next page, if any.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Phase { repo: RepoId, phase: SyncPhase },
    Progress(SyncProgress),
}

/// Sending half of the progress channel. The default sender discards events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl ProgressSender {
    /// A sender for callers that do not care about progress.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn send(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            // receiver dropped: nobody is listening any more
            let _ = tx.send(event);
        }
    }
}

pub fn progress_channel() -> (ProgressSender, mpsc::UnboundedReceiver<SyncEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn phase_event() -> SyncEvent {
        SyncEvent::Phase {
            repo: RepoId::new("acme", "widgets"),
            phase: SyncPhase::FetchingIssues,
        }
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_order() {
        let (tx, mut rx) = progress_channel();
        tx.send(phase_event());
        tx.send(SyncEvent::Progress(SyncProgress {
            repo: RepoId::new("acme", "widgets"),
            phase: ProgressPhase::Issues,
            fetched: 50,
            total: None,
            page: 1,
            cursor: None,
        }));

        assert_eq!(rx.recv().await.unwrap(), phase_event());
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::Progress(p) if p.fetched == 50));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = progress_channel();
        drop(rx);
        tx.send(phase_event());
    }

    #[test]
    fn test_disabled_sender_discards() {
        ProgressSender::disabled().send(phase_event());
    }
}
