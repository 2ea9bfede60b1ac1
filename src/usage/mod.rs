//! Per-session token and cost accounting.
//!
//! The ledger is an append-only list of [`SessionRecord`]s plus a rolling
//! [`UsageSummary`], persisted to `usage_statistics.json` in the project
//! directory after every append. Records are immutable once written.

pub mod report;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::fsutil;
use crate::pricing::{round6, CostBreakdown, PricingResolver, TokenCounts};
use crate::types::Result;

/// Usage file name inside the project directory.
pub const USAGE_FILENAME: &str = "usage_statistics.json";

/// Which prompt drove a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    #[serde(rename = "test_planner")]
    Planner,
    #[serde(rename = "test_executor")]
    Executor,
    #[serde(rename = "test_reporter")]
    Reporter,
}

impl SessionType {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionType::Planner => "test_planner",
            SessionType::Executor => "test_executor",
            SessionType::Reporter => "test_reporter",
        }
    }

    /// Short title for reports.
    pub fn label(self) -> &'static str {
        match self {
            SessionType::Planner => "Planner",
            SessionType::Executor => "Executor",
            SessionType::Reporter => "Reporter",
        }
    }
}

/// Token counts as persisted, including the derived total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedTokens {
    #[serde(flatten)]
    pub counts: TokenCounts,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One completed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub session_type: SessionType,
    pub model: String,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub tokens: RecordedTokens,
    pub costs: CostBreakdown,
    /// Cost as reported by the agent itself, kept for comparison.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_cost_usd: Option<f64>,
    #[serde(default)]
    pub resumed: bool,
}

/// Rolling aggregate over all records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_sessions: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for UsageSummary {
    fn default() -> Self {
        Self {
            total_sessions: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cache_creation_tokens: 0,
            total_cache_read_tokens: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            last_updated: Utc::now(),
        }
    }
}

impl UsageSummary {
    /// Recompute from the full record list.
    pub fn from_sessions(sessions: &[SessionRecord]) -> Self {
        let mut summary = UsageSummary {
            total_sessions: sessions.len(),
            ..Default::default()
        };
        let mut cost = 0.0;
        for s in sessions {
            summary.total_input_tokens += s.tokens.counts.input_tokens;
            summary.total_output_tokens += s.tokens.counts.output_tokens;
            summary.total_cache_creation_tokens += s.tokens.counts.cache_creation_tokens;
            summary.total_cache_read_tokens += s.tokens.counts.cache_read_tokens;
            cost += s.costs.total_cost;
        }
        summary.total_tokens = summary.total_input_tokens
            + summary.total_output_tokens
            + summary.total_cache_creation_tokens
            + summary.total_cache_read_tokens;
        summary.total_cost_usd = round6(cost);
        summary
    }

    pub fn average_cost(&self) -> f64 {
        if self.total_sessions == 0 {
            0.0
        } else {
            self.total_cost_usd / self.total_sessions as f64
        }
    }
}

/// On-disk document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageFile {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub summary: UsageSummary,
}

/// Input to [`UsageLedger::record_session`].
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub session_id: String,
    pub session_type: SessionType,
    pub model: String,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub tokens: TokenCounts,
    pub reported_cost_usd: Option<f64>,
    pub resumed: bool,
}

/// Append-only usage log for one project.
#[derive(Debug)]
pub struct UsageLedger {
    project_dir: PathBuf,
    stats_file: PathBuf,
    data: UsageFile,
}

impl UsageLedger {
    /// Load existing statistics. A corrupt file is replaced by an empty ledger.
    pub fn open(project_dir: impl Into<PathBuf>) -> Self {
        let project_dir = project_dir.into();
        let stats_file = project_dir.join(USAGE_FILENAME);
        let data = load_or_empty(&stats_file);
        Self {
            project_dir,
            stats_file,
            data,
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn stats_file(&self) -> &Path {
        &self.stats_file
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.data.sessions
    }

    pub fn summary(&self) -> &UsageSummary {
        &self.data.summary
    }

    pub fn data(&self) -> &UsageFile {
        &self.data
    }

    /// Re-read from disk.
    pub fn reload(&mut self) {
        self.data = load_or_empty(&self.stats_file);
    }

    /// Price, append and persist one session.
    ///
    /// The record is kept in memory even when the write fails; the error is
    /// returned so the caller can log it.
    pub async fn record_session(
        &mut self,
        params: SessionParams,
        pricing: &PricingResolver,
    ) -> Result<SessionRecord> {
        let costs = pricing
            .calculate_cost_async(&params.tokens, &params.model)
            .await;
        let record = SessionRecord {
            session_id: params.session_id,
            timestamp: Utc::now(),
            session_type: params.session_type,
            model: params.model,
            duration_ms: params.duration_ms,
            num_turns: params.num_turns,
            tokens: RecordedTokens {
                counts: params.tokens,
                total_tokens: params.tokens.total(),
            },
            costs,
            reported_cost_usd: params.reported_cost_usd,
            resumed: params.resumed,
        };

        self.data.sessions.push(record.clone());
        self.data.summary = UsageSummary::from_sessions(&self.data.sessions);
        self.save()?;
        Ok(record)
    }

    pub fn save(&self) -> Result<()> {
        fsutil::atomic_write_json(&self.stats_file, &self.data)
    }
}

fn load_or_empty(path: &Path) -> UsageFile {
    if !path.exists() {
        return UsageFile::default();
    }
    match fsutil::read_json::<UsageFile>(path) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("could not load usage statistics, starting fresh: {}", e);
            UsageFile::default()
        }
    }
}

/// Log a per-session breakdown with project totals.
pub fn log_session_stats(record: &SessionRecord, summary: &UsageSummary) {
    let t = &record.tokens.counts;
    let c = &record.costs;
    tracing::info!(
        session_type = record.session_type.as_str(),
        duration_s = record.duration_ms as f64 / 1000.0,
        turns = record.num_turns,
        input_tokens = t.input_tokens,
        output_tokens = t.output_tokens,
        cache_write_tokens = t.cache_creation_tokens,
        cache_read_tokens = t.cache_read_tokens,
        total_tokens = record.tokens.total_tokens,
        cost_usd = c.total_cost,
        "session usage recorded"
    );
    tracing::info!(
        sessions = summary.total_sessions,
        total_tokens = summary.total_tokens,
        total_cost_usd = summary.total_cost_usd,
        avg_cost_usd = round6(summary.average_cost()),
        "project usage totals"
    );
}
