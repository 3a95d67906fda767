//! Sync pass state machine.
//!
//! A pass moves strictly forward through its phases; any live phase may end
//! in `Failed` or `Cancelled`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    FetchingIssues,
    ReconcilingIssues,
    FetchingComments,
    Committing,
    Completed,
    Failed,
    Cancelled,
}

impl SyncPhase {
    /// True once the pass has ended, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SyncPhase::Completed | SyncPhase::Failed | SyncPhase::Cancelled
        )
    }

    pub fn can_transition_to(self, next: SyncPhase) -> bool {
        use SyncPhase::*;

        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Cancelled => true,
            FetchingIssues => self == Idle,
            ReconcilingIssues => self == FetchingIssues,
            FetchingComments => self == ReconcilingIssues,
            Committing => self == FetchingComments,
            Completed => self == Committing,
            Idle => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::FetchingIssues => "fetching_issues",
            SyncPhase::ReconcilingIssues => "reconciling_issues",
            SyncPhase::FetchingComments => "fetching_comments",
            SyncPhase::Committing => "committing",
            SyncPhase::Completed => "completed",
            SyncPhase::Failed => "failed",
            SyncPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
