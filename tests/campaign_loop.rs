//! Campaign Loop Integration Tests
//!
//! Drives the full loop against the scripted backend. Each scripted session
//! can rewrite the ledger, standing in for the agent's own edits.

use std::path::Path;
use std::time::Duration;

use campaign_orchestrator::agent::{ScriptedBackend, ScriptedSession, ScriptedStep, SessionStatus};
use campaign_orchestrator::campaign::{Campaign, CampaignOutcome};
use campaign_orchestrator::progress::LEDGER_FILENAME;
use campaign_orchestrator::resume::SessionStateStore;
use campaign_orchestrator::usage::{report::COST_REPORT_FILENAME, SessionType};
use campaign_orchestrator::Config;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

fn test_config(project_dir: &Path) -> Config {
    let mut config = Config::default();
    config.campaign.project_dir = project_dir.to_path_buf();
    config.campaign.inter_session_delay = Duration::ZERO;
    config.campaign.run_reporting_session = false;
    config.pricing.cache_dir = project_dir.join(".pricing-cache");
    config.pricing.source_url = "http://127.0.0.1:9/pricing.json".to_string();
    config.pricing.fetch_timeout = Duration::from_millis(200);
    config
}

/// Ledger with cases in the given statuses, in order.
fn ledger(statuses: &[&str]) -> Value {
    let cases: Vec<Value> = statuses
        .iter()
        .enumerate()
        .map(|(i, status)| {
            json!({
                "case_id": format!("TC-{:03}", i + 1),
                "title": format!("Scenario {}", i + 1),
                "steps": ["open the app", "check the result"],
                "status": status,
            })
        })
        .collect();
    json!({ "test_cases": cases })
}

fn write_ledger(project_dir: &Path, statuses: &[&str]) {
    std::fs::create_dir_all(project_dir).unwrap();
    std::fs::write(
        project_dir.join(LEDGER_FILENAME),
        serde_json::to_vec_pretty(&ledger(statuses)).unwrap(),
    )
    .unwrap();
}

fn repeat(status: &'static str, n: usize) -> Vec<&'static str> {
    vec![status; n]
}

// =============================================================================
// Terminal Outcomes
// =============================================================================

#[tokio::test]
async fn test_idle_loop_detected_after_three_unchanged_iterations() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 12));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::success("sess-1", 1_000, 100),
        ScriptedSession::success("sess-2", 1_000, 100),
        ScriptedSession::success("sess-3", 1_000, 100),
        ScriptedSession::success("sess-4", 1_000, 100),
    ]);
    let mut campaign = Campaign::new(test_config(dir.path()), backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::IdleLoopDetected);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.stats.not_run, 12);
    assert_eq!(campaign.backend().remaining().await, 1);
}

#[tokio::test]
async fn test_all_blocked_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::success("plan-1", 2_000, 500).with_ledger(ledger(&repeat("Not Run", 5))),
        ScriptedSession::success("exec-1", 3_000, 400).with_ledger(ledger(&repeat("Blocked", 5))),
    ]);
    let mut config = test_config(dir.path());
    config.campaign.run_reporting_session = true;
    let mut campaign = Campaign::new(config, backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::AllBlocked);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.stats.blocked, 5);

    // Planner first, no reporting session after an all-blocked ledger.
    let requests = campaign.backend().requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[0].prompt.starts_with("# Role: Test Planner"));
    assert!(requests[1].prompt.starts_with("# Role: Test Executor"));

    let types: Vec<SessionType> =
        campaign.usage().sessions().iter().map(|s| s.session_type).collect();
    assert_eq!(types, vec![SessionType::Planner, SessionType::Executor]);
}

#[tokio::test]
async fn test_completion_runs_reporting_session() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 4));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::success("exec-1", 10_000, 2_000)
            .with_ledger(ledger(&["Pass", "Pass", "Fail", "Blocked"])),
        ScriptedSession::success("report-1", 5_000, 1_000),
    ]);
    let mut config = test_config(dir.path());
    config.campaign.run_reporting_session = true;
    let mut campaign = Campaign::new(config, backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::AllCompleted);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stats.passed, 2);
    assert_eq!(report.usage.total_sessions, 2);
    assert_eq!(report.usage.total_input_tokens, 15_000);

    let requests = campaign.backend().requests().await;
    assert!(requests[1].prompt.starts_with("# Role: Test Reporter"));
    assert_eq!(requests[1].resume_session_id, None);

    assert!(dir.path().join(COST_REPORT_FILENAME).exists());
    let state = SessionStateStore::new(dir.path()).load().unwrap();
    assert_eq!(state.last_session_status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_max_iterations_leaves_campaign_resumable() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 4));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::success("exec-1", 1_000, 100)
            .with_ledger(ledger(&["Pass", "Not Run", "Not Run", "Not Run"])),
        ScriptedSession::success("exec-2", 1_000, 100)
            .with_ledger(ledger(&["Pass", "Pass", "Not Run", "Not Run"])),
        ScriptedSession::success("exec-3", 1_000, 100),
    ]);
    let mut config = test_config(dir.path());
    config.campaign.max_iterations = Some(2);
    let mut campaign = Campaign::new(config, backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::MaxIterationsReached);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.stats.not_run, 2);

    let state = SessionStateStore::new(dir.path()).load().unwrap();
    assert_eq!(state.last_session_status, SessionStatus::Continue);
    assert!(state.last_session_made_progress);
}

// =============================================================================
// Resume and Retry
// =============================================================================

#[tokio::test]
async fn test_resume_ids_passed_to_backend() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 3));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::success("sess-1", 1_000, 100),
        ScriptedSession::success("sess-2", 1_000, 100),
        ScriptedSession::success("sess-3", 1_000, 100),
    ]);
    let mut campaign = Campaign::new(test_config(dir.path()), backend).unwrap();
    campaign.run(CancellationToken::new()).await.unwrap();

    let requests = campaign.backend().requests().await;
    let resumed: Vec<Option<String>> = requests
        .iter()
        .map(|r| r.resume_session_id.as_ref().map(|id| id.as_str().to_string()))
        .collect();
    assert_eq!(
        resumed,
        vec![None, Some("sess-1".to_string()), Some("sess-2".to_string())]
    );
    assert!(requests[1].prompt.contains("## Resumed session"));
    assert!(!requests[0].prompt.contains("## Resumed session"));

    let flags: Vec<bool> = campaign.usage().sessions().iter().map(|s| s.resumed).collect();
    assert_eq!(flags, vec![false, true, true]);
}

#[tokio::test]
async fn test_context_overflow_retries_with_fresh_session() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 2));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::overflow("sess-1"),
        ScriptedSession::success("sess-2", 1_000, 100).with_ledger(ledger(&["Pass", "Fail"])),
    ]);
    let mut campaign = Campaign::new(test_config(dir.path()), backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::AllCompleted);
    assert_eq!(report.iterations, 2);

    let requests = campaign.backend().requests().await;
    assert_eq!(requests[1].resume_session_id, None);
    assert_eq!(report.usage.total_sessions, 2);
}

#[tokio::test]
async fn test_stream_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 1));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::from_steps(vec![ScriptedStep::Fail("connection reset".into())]),
        ScriptedSession::success("sess-2", 1_000, 100).with_ledger(ledger(&["Pass"])),
    ]);
    let mut campaign = Campaign::new(test_config(dir.path()), backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::AllCompleted);
    // The failed stream carried no usage, so only one session is recorded.
    assert_eq!(report.usage.total_sessions, 1);
}

#[tokio::test]
async fn test_abort_interrupts_hanging_session() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 3));

    let backend = ScriptedBackend::new(vec![ScriptedSession::from_steps(vec![ScriptedStep::Hang])]);
    let mut campaign = Campaign::new(test_config(dir.path()), backend).unwrap();

    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let report = campaign.run(abort).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(report.iterations, 1);

    // Interrupted campaigns stay resumable: the state is not stamped completed.
    let state = SessionStateStore::new(dir.path()).load().unwrap();
    assert_eq!(state.last_session_status, SessionStatus::Error);
}

#[tokio::test]
async fn test_session_timeout_aborts_only_that_session() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 2));

    let backend = ScriptedBackend::new(vec![
        ScriptedSession::from_steps(vec![ScriptedStep::Hang]),
        ScriptedSession::success("sess-2", 1_000, 100).with_ledger(ledger(&["Pass", "Fail"])),
    ]);
    let mut config = test_config(dir.path());
    config.campaign.session_timeout = Some(Duration::from_millis(50));
    let mut campaign = Campaign::new(config, backend).unwrap();

    let abort = CancellationToken::new();
    let report = campaign.run(abort.clone()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::AllCompleted);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.iterations, 2);
    assert!(!abort.is_cancelled());

    // The timed-out session is an error, so the retry starts fresh.
    let requests = campaign.backend().requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].resume_session_id, None);
}

#[tokio::test]
async fn test_session_timeout_does_not_mask_interrupt() {
    let dir = tempfile::tempdir().unwrap();
    write_ledger(dir.path(), &repeat("Not Run", 2));

    let backend = ScriptedBackend::new(vec![ScriptedSession::from_steps(vec![ScriptedStep::Hang])]);
    let mut config = test_config(dir.path());
    config.campaign.session_timeout = Some(Duration::from_secs(3600));
    let mut campaign = Campaign::new(config, backend).unwrap();

    let abort = CancellationToken::new();
    let trigger = abort.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let report = campaign.run(abort).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::Interrupted);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(report.iterations, 1);
}

#[tokio::test]
async fn test_ledger_read_where_the_agent_writes_it() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![
        ScriptedSession::success("plan-1", 1_000, 100).with_ledger(ledger(&["Pass"])),
    ]);
    let mut campaign = Campaign::new(test_config(dir.path()), backend).unwrap();
    assert_eq!(campaign.ledger_path(), dir.path().join(LEDGER_FILENAME));

    let report = campaign.run(CancellationToken::new()).await.unwrap();
    assert_eq!(report.outcome, CampaignOutcome::AllCompleted);
    assert_eq!(report.stats.passed, 1);
}

#[tokio::test]
async fn test_test_spec_copied_into_fresh_project() {
    let dir = tempfile::tempdir().unwrap();
    let spec = dir.path().join("spec.txt");
    std::fs::write(&spec, "Login page must reject bad passwords.").unwrap();
    let project = dir.path().join("project");

    let mut config = test_config(&project);
    config.campaign.test_spec = Some(spec);
    config.campaign.max_iterations = Some(1);
    let backend = ScriptedBackend::new(vec![ScriptedSession::success("plan-1", 1_000, 100)]);
    let mut campaign = Campaign::new(config, backend).unwrap();
    let report = campaign.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CampaignOutcome::MaxIterationsReached);
    let copied = std::fs::read_to_string(project.join("test_spec.txt")).unwrap();
    assert_eq!(copied, "Login page must reject bad passwords.");
}
