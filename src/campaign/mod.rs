//! Orchestration loop.
//!
//! The [`Campaign`] runs one agent invocation at a time against a project
//! directory until the test-case ledger reaches a terminal state, the loop
//! stops making progress, the iteration cap is hit, or the abort token fires.
//!
//! ```text
//!   ┌─────────────┐   no ledger    ┌──────────┐
//!   │ iteration N │ ─────────────→ │ planner  │ ──┐
//!   └─────────────┘                └──────────┘   │
//!          │ ledger present                       │
//!          ↓                                      ↓
//!   resume decision → executor → usage → stats → session state
//!                                                 │
//!          terminal? idle? ───────── no ── sleep ─┘
//! ```
//!
//! Every piece of persistent state lives in files under the project directory,
//! so a stopped campaign can be rerun and picks up from the ledger.

mod outcome;
mod prompts;
mod scaffold;

pub use outcome::{CampaignOutcome, CampaignReport};
pub use prompts::PromptSet;
pub use scaffold::{prepare_project, resolve_project_dir, GENERATIONS_DIR, TEST_SPEC_FILENAME};

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::agent::{
    run_session, AgentBackend, AgentRequest, SessionOptions, SessionResult, SessionStatus,
};
use crate::pricing::PricingResolver;
use crate::progress::{
    count_defects, count_test_cases, log_progress_summary, TestCaseStats, LEDGER_FILENAME,
};
use crate::resume::{mark_completed, should_resume_session, update_session_state, SessionOutcome};
use crate::types::{AgentSessionId, Config, Error, Result};
use crate::usage::{log_session_stats, report, SessionParams, SessionType, UsageLedger};

// =============================================================================
// Loop state
// =============================================================================

/// Counters threaded through the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    /// Invocations started so far.
    pub iteration: u32,
    /// `not_run` after the previous invocation.
    pub previous_not_run: u32,
    /// Consecutive invocations that left `not_run` unchanged.
    pub no_progress_iterations: u32,
    /// No ledger exists yet, so the next invocation plans.
    pub planning_pending: bool,
}

impl LoopState {
    /// Seed from the ledger as found before the first invocation.
    pub fn new(initial_not_run: u32, ledger_exists: bool) -> Self {
        Self {
            iteration: 0,
            previous_not_run: initial_not_run,
            no_progress_iterations: 0,
            planning_pending: !ledger_exists,
        }
    }

    /// Fold in the latest `not_run`; returns the no-progress streak.
    pub fn record_not_run(&mut self, not_run: u32) -> u32 {
        if not_run == self.previous_not_run {
            self.no_progress_iterations += 1;
        } else {
            self.no_progress_iterations = 0;
        }
        self.previous_not_run = not_run;
        self.no_progress_iterations
    }
}

/// Terminal outcome implied by a ledger snapshot, if any.
pub fn terminal_outcome(stats: &TestCaseStats) -> Option<CampaignOutcome> {
    if stats.total == 0 || stats.not_run > 0 {
        return None;
    }
    if stats.blocked == stats.total {
        Some(CampaignOutcome::AllBlocked)
    } else {
        Some(CampaignOutcome::AllCompleted)
    }
}

// =============================================================================
// Campaign
// =============================================================================

/// A test campaign bound to one project directory and one agent backend.
#[derive(Debug)]
pub struct Campaign<B: AgentBackend> {
    config: Config,
    project_dir: PathBuf,
    backend: B,
    pricing: PricingResolver,
    usage: UsageLedger,
    prompts: PromptSet,
    session_options: SessionOptions,
}

impl<B: AgentBackend> Campaign<B> {
    /// Validate the config, prepare the project directory and load prompts.
    pub fn new(config: Config, backend: B) -> Result<Self> {
        config.validate()?;
        let project_dir = resolve_project_dir(&config.campaign.project_dir);
        prepare_project(&project_dir, config.campaign.test_spec.as_deref())?;
        let prompts = PromptSet::load(config.campaign.prompts_dir.as_deref())?;
        let pricing = PricingResolver::new(config.pricing.clone());
        let usage = UsageLedger::open(&project_dir);
        let session_options = SessionOptions::for_model(&config.agent, &config.campaign.model);

        Ok(Self {
            config,
            project_dir,
            backend,
            pricing,
            usage,
            prompts,
            session_options,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.project_dir.join(LEDGER_FILENAME)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    /// Run until a terminal outcome.
    ///
    /// Agent failures never end the run; they are retried with a fresh
    /// session on the next iteration. The only errors returned come from
    /// setting up the project directory.
    pub async fn run(&mut self, abort: CancellationToken) -> Result<CampaignReport> {
        fs::create_dir_all(&self.project_dir)?;
        let ledger_path = self.ledger_path();
        let mut stats = count_test_cases(&self.project_dir);
        let mut state = LoopState::new(stats.not_run, ledger_path.exists());
        let idle_cap = self.config.campaign.idle_iteration_cap;

        tracing::info!(
            project_dir = %self.project_dir.display(),
            model = %self.config.campaign.model,
            backend = self.backend.name(),
            max_iterations = ?self.config.campaign.max_iterations,
            total = stats.total,
            not_run = stats.not_run,
            planning = state.planning_pending,
            "campaign starting"
        );

        let outcome = loop {
            if abort.is_cancelled() {
                break CampaignOutcome::Interrupted;
            }
            if let Some(max) = self.config.campaign.max_iterations {
                if state.iteration >= max {
                    tracing::info!(max_iterations = max, "iteration cap reached");
                    break CampaignOutcome::MaxIterationsReached;
                }
            }
            state.iteration += 1;

            let (kind, resume) = if state.planning_pending {
                (SessionType::Planner, None)
            } else {
                let decision =
                    should_resume_session(&self.project_dir, stats.not_run, &self.config.resume);
                (SessionType::Executor, decision.resume_session_id)
            };
            let resumed = resume.is_some();
            tracing::info!(
                iteration = state.iteration,
                session_type = kind.as_str(),
                resumed,
                "starting {} session",
                kind.label()
            );

            let result = self.invoke(kind, resume, &abort).await;

            stats = count_test_cases(&self.project_dir);
            state.planning_pending = !ledger_path.exists();
            update_session_state(
                &self.project_dir,
                SessionOutcome {
                    session_id: result.session_id.clone(),
                    status: result.status,
                    not_run: stats.not_run,
                    resumed,
                    ended_at: Utc::now(),
                },
            );
            tracing::info!(
                iteration = state.iteration,
                status = %result.status,
                total = stats.total,
                passed = stats.passed,
                failed = stats.failed,
                blocked = stats.blocked,
                not_run = stats.not_run,
                "session complete"
            );

            if abort.is_cancelled() {
                break CampaignOutcome::Interrupted;
            }
            if let Some(terminal) = terminal_outcome(&stats) {
                match terminal {
                    CampaignOutcome::AllBlocked => {
                        let err = Error::AllBlocked { total: stats.total };
                        tracing::error!(
                            error = %err,
                            "review defect reports and resolve blockers before retrying"
                        );
                    }
                    _ => tracing::info!(
                        total = stats.total,
                        pass_rate = %format!("{:.1}", stats.pass_rate()),
                        "all test cases completed"
                    ),
                }
                break terminal;
            }

            let streak = state.record_not_run(stats.not_run);
            if streak >= idle_cap {
                let err = Error::IdleLoop {
                    not_run: stats.not_run,
                    iterations: streak,
                };
                tracing::error!(
                    error = %err,
                    cap = idle_cap,
                    "stopping; the agent is not updating the ledger"
                );
                break CampaignOutcome::IdleLoopDetected;
            }
            if streak > 0 {
                tracing::warn!(
                    not_run = stats.not_run,
                    streak,
                    cap = idle_cap,
                    "no ledger progress this iteration"
                );
            }

            match result.error() {
                Some(err @ Error::ContextOverflow(_)) => tracing::warn!(
                    error = %err,
                    compactions = result.compactions,
                    "context window exhausted; next session starts fresh"
                ),
                Some(err) => {
                    tracing::warn!(error = %err, "session failed; next session starts fresh")
                }
                None => {}
            }

            let delay = self.config.campaign.inter_session_delay;
            let interrupted = tokio::select! {
                _ = abort.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if interrupted {
                break CampaignOutcome::Interrupted;
            }
        };

        tracing::info!(outcome = %outcome, iterations = state.iteration, "campaign loop finished");

        if outcome == CampaignOutcome::AllCompleted && self.config.campaign.run_reporting_session {
            self.run_reporting_session(&abort).await;
        }
        if !outcome.is_resumable() {
            mark_completed(&self.project_dir);
        }
        self.write_cost_reports();

        let defects = count_defects(&self.project_dir, &self.config.campaign.reports_dir);
        log_progress_summary(&stats, defects);

        Ok(CampaignReport {
            outcome,
            iterations: state.iteration,
            stats,
            defects,
            usage: self.usage.summary().clone(),
        })
    }

    async fn invoke(
        &mut self,
        kind: SessionType,
        resume: Option<AgentSessionId>,
        abort: &CancellationToken,
    ) -> SessionResult {
        let resumed = resume.is_some();
        // Cancelling the child aborts this session only; the campaign token stays live.
        let session_abort = abort.child_token();
        let watchdog = self.config.campaign.session_timeout.map(|limit| {
            let token = session_abort.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                tracing::warn!(
                    timeout_s = limit.as_secs_f64(),
                    session_type = kind.as_str(),
                    "session timed out, aborting it"
                );
                token.cancel();
            })
        });

        let request = AgentRequest {
            prompt: self.prompts.for_session(kind, resumed),
            model: self.config.campaign.model.clone(),
            resume_session_id: resume,
            cwd: self.project_dir.clone(),
            abort: session_abort,
        };
        let result = run_session(&self.backend, request, &self.session_options).await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        self.record_usage(kind, &result, resumed).await;
        result
    }

    // Usage persistence is best-effort.
    async fn record_usage(&mut self, kind: SessionType, result: &SessionResult, resumed: bool) {
        let Some(usage) = &result.usage else {
            tracing::warn!(
                session_type = kind.as_str(),
                "session reported no usage; nothing recorded"
            );
            return;
        };
        let params = SessionParams {
            session_id: result
                .session_id
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            session_type: kind,
            model: self.config.campaign.model.clone(),
            duration_ms: usage.duration_ms,
            num_turns: usage.num_turns,
            tokens: usage.tokens,
            reported_cost_usd: usage.total_cost_usd,
            resumed,
        };
        match self.usage.record_session(params, &self.pricing).await {
            Ok(record) => log_session_stats(&record, self.usage.summary()),
            Err(e) => tracing::warn!("failed to persist usage statistics: {}", e),
        }
    }

    async fn run_reporting_session(&mut self, abort: &CancellationToken) {
        tracing::info!("running final reporting session");
        let result = self.invoke(SessionType::Reporter, None, abort).await;
        if result.status != SessionStatus::Continue {
            tracing::warn!(
                status = %result.status,
                error = result.error_text.as_deref().unwrap_or(""),
                "reporting session did not finish cleanly"
            );
        }
    }

    fn write_cost_reports(&self) {
        let reports_dir = &self.config.campaign.reports_dir;
        match report::write_cost_report(&self.project_dir, reports_dir, self.usage.data()) {
            Ok(path) => tracing::info!(path = %path.display(), "cost report written"),
            Err(e) => tracing::warn!("failed to write cost report: {}", e),
        }
        let usage = self.usage.data();
        match report::fill_html_cost_placeholders(&self.project_dir, reports_dir, usage) {
            Ok(true) => tracing::info!("html report cost statistics updated"),
            Ok(false) => tracing::debug!("no html report to update"),
            Err(e) => tracing::warn!("failed to update html report: {}", e),
        }
    }
}
