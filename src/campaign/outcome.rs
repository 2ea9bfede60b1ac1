//! Terminal outcomes of a campaign run.

use serde::Serialize;
use std::fmt;

use crate::progress::TestCaseStats;
use crate::usage::UsageSummary;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignOutcome {
    /// Every case has a terminal status and at least one is not blocked.
    AllCompleted,
    /// Every case is blocked.
    AllBlocked,
    /// `not_run` did not move for the configured number of iterations.
    IdleLoopDetected,
    /// The configured iteration cap was reached first.
    MaxIterationsReached,
    /// The abort signal fired.
    Interrupted,
}

impl CampaignOutcome {
    /// Process exit code for the runner binary.
    pub fn exit_code(self) -> i32 {
        match self {
            CampaignOutcome::AllCompleted | CampaignOutcome::MaxIterationsReached => 0,
            CampaignOutcome::AllBlocked => 1,
            CampaignOutcome::IdleLoopDetected => 2,
            CampaignOutcome::Interrupted => 130,
        }
    }

    /// Whether a later rerun can pick up where this one stopped.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            CampaignOutcome::MaxIterationsReached | CampaignOutcome::Interrupted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignOutcome::AllCompleted => "all_completed",
            CampaignOutcome::AllBlocked => "all_blocked",
            CampaignOutcome::IdleLoopDetected => "idle_loop_detected",
            CampaignOutcome::MaxIterationsReached => "max_iterations_reached",
            CampaignOutcome::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for CampaignOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary returned by [`Campaign::run`](super::Campaign::run).
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub outcome: CampaignOutcome,
    pub iterations: u32,
    pub stats: TestCaseStats,
    pub defects: usize,
    pub usage: UsageSummary,
}

impl CampaignReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}
