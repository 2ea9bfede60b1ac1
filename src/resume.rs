//! Resume-or-restart policy for agent sessions.
//!
//! Resuming keeps the provider's prompt cache warm, but a resumed conversation
//! can also keep "remembering" work it never wrote to the ledger. The policy
//! resumes only when the previous session ended cleanly, recently, and the
//! recent resumes have moved the ledger forward.
//!
//! State flows by value: [`decide_resume`] reads the previous [`SessionState`],
//! [`next_session_state`] builds the replacement from an outcome, and only the
//! store touches the disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::SessionStatus;
use crate::fsutil;
use crate::types::{AgentSessionId, Result, ResumePolicy};

pub const SESSION_STATE_FILENAME: &str = ".session_state.json";

/// Appended to the executor prompt when a session is resumed.
pub const RESUME_PROMPT_SUPPLEMENT: &str = "\n\n## Resumed session\n\n\
This conversation is being resumed. Do not rely on your memory of earlier turns for \
test status. Re-read test_cases.json now and treat it as the only source of truth: \
a test case is done only if its status in the file is Pass, Fail or Blocked. Continue \
with the first test case whose status is \"Not Run\", and write each result to the file \
before moving on.\n";

/// Persisted record of the last invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub last_session_id: Option<AgentSessionId>,
    pub last_session_end_time: DateTime<Utc>,
    pub last_not_run_count: u32,
    pub last_session_made_progress: bool,
    #[serde(default)]
    pub resumed_without_progress_count: u32,
    pub last_session_status: SessionStatus,
}

/// What happened in the invocation that just finished.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Option<AgentSessionId>,
    pub status: SessionStatus,
    pub not_run: u32,
    pub resumed: bool,
    pub ended_at: DateTime<Utc>,
}

/// Why a resume decision came out the way it did.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeReason {
    NoPriorState,
    NoPriorSession,
    CacheExpired { elapsed: Duration, ttl: Duration },
    PriorStatus(SessionStatus),
    NoProgressCap { count: u32, cap: u32 },
    Resumable { elapsed: Duration },
}

impl fmt::Display for ResumeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeReason::NoPriorState => write!(f, "no previous session state"),
            ResumeReason::NoPriorSession => write!(f, "previous session has no id"),
            ResumeReason::CacheExpired { elapsed, ttl } => write!(
                f,
                "prompt cache expired ({}s since last session, ttl {}s)",
                elapsed.as_secs(),
                ttl.as_secs()
            ),
            ResumeReason::PriorStatus(status) => {
                write!(f, "previous session ended with status '{status}'")
            }
            ResumeReason::NoProgressCap { count, cap } => write!(
                f,
                "{count} resumed sessions without progress (cap {cap})"
            ),
            ResumeReason::Resumable { elapsed } => write!(
                f,
                "previous session ended cleanly {}s ago",
                elapsed.as_secs()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumeDecision {
    pub resume_session_id: Option<AgentSessionId>,
    pub reason: ResumeReason,
}

impl ResumeDecision {
    fn fresh(reason: ResumeReason) -> Self {
        Self {
            resume_session_id: None,
            reason,
        }
    }

    pub fn is_resume(&self) -> bool {
        self.resume_session_id.is_some()
    }
}

/// Pure resume policy, evaluated in priority order.
pub fn decide_resume(
    state: Option<&SessionState>,
    policy: &ResumePolicy,
    now: DateTime<Utc>,
) -> ResumeDecision {
    let Some(state) = state else {
        return ResumeDecision::fresh(ResumeReason::NoPriorState);
    };
    let Some(session_id) = &state.last_session_id else {
        return ResumeDecision::fresh(ResumeReason::NoPriorSession);
    };

    let elapsed = (now - state.last_session_end_time)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if elapsed > policy.cache_ttl {
        return ResumeDecision::fresh(ResumeReason::CacheExpired {
            elapsed,
            ttl: policy.cache_ttl,
        });
    }
    if state.last_session_status != SessionStatus::Continue {
        return ResumeDecision::fresh(ResumeReason::PriorStatus(state.last_session_status));
    }
    if state.resumed_without_progress_count >= policy.max_resumes_without_progress {
        return ResumeDecision::fresh(ResumeReason::NoProgressCap {
            count: state.resumed_without_progress_count,
            cap: policy.max_resumes_without_progress,
        });
    }

    ResumeDecision {
        resume_session_id: Some(session_id.clone()),
        reason: ResumeReason::Resumable { elapsed },
    }
}

/// Build the state that replaces `previous` after an invocation.
pub fn next_session_state(previous: Option<SessionState>, outcome: SessionOutcome) -> SessionState {
    let (made_progress, prior_count) = match &previous {
        Some(prev) => (
            outcome.not_run < prev.last_not_run_count,
            prev.resumed_without_progress_count,
        ),
        None => (false, 0),
    };
    let resumed_without_progress_count = if outcome.resumed && !made_progress {
        prior_count + 1
    } else {
        0
    };

    SessionState {
        last_session_id: outcome.session_id,
        last_session_end_time: outcome.ended_at,
        last_not_run_count: outcome.not_run,
        last_session_made_progress: made_progress,
        resumed_without_progress_count,
        last_session_status: outcome.status,
    }
}

/// `.session_state.json` in a project directory.
#[derive(Debug, Clone)]
pub struct SessionStateStore {
    path: PathBuf,
}

impl SessionStateStore {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            path: project_dir.join(SESSION_STATE_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable state reads as `None`.
    pub fn load(&self) -> Option<SessionState> {
        if !self.path.exists() {
            return None;
        }
        match fsutil::read_json(&self.path) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("ignoring unreadable session state: {}", e);
                None
            }
        }
    }

    pub fn save(&self, state: &SessionState) -> Result<()> {
        fsutil::atomic_write_json(&self.path, state)
    }
}

/// Load state and decide whether the next session resumes.
pub fn should_resume_session(
    project_dir: &Path,
    current_not_run: u32,
    policy: &ResumePolicy,
) -> ResumeDecision {
    let state = SessionStateStore::new(project_dir).load();
    let decision = decide_resume(state.as_ref(), policy, Utc::now());
    tracing::info!(
        resume = decision.is_resume(),
        not_run = current_not_run,
        last_not_run = state.as_ref().map(|s| s.last_not_run_count),
        resumes_without_progress = state.as_ref().map(|s| s.resumed_without_progress_count),
        ttl_s = policy.cache_ttl.as_secs(),
        reason = %decision.reason,
        "resume decision"
    );
    decision
}

/// Fold one outcome into the persisted state. Write failures are logged, not returned.
pub fn update_session_state(project_dir: &Path, outcome: SessionOutcome) -> SessionState {
    let store = SessionStateStore::new(project_dir);
    let next = next_session_state(store.load(), outcome);
    if let Err(e) = store.save(&next) {
        tracing::warn!("failed to persist session state: {}", e);
    }
    tracing::debug!(
        status = %next.last_session_status,
        not_run = next.last_not_run_count,
        made_progress = next.last_session_made_progress,
        resumes_without_progress = next.resumed_without_progress_count,
        "session state updated"
    );
    next
}

/// Stamp `Completed` on the persisted state so a later rerun starts fresh.
pub fn mark_completed(project_dir: &Path) {
    let store = SessionStateStore::new(project_dir);
    let Some(mut state) = store.load() else {
        return;
    };
    state.last_session_status = SessionStatus::Completed;
    if let Err(e) = store.save(&state) {
        tracing::warn!("failed to persist completed session state: {}", e);
    }
}
