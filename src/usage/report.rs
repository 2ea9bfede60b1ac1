//! Cost statistics rendering.
//!
//! Produces the markdown cost report written next to the test reports and
//! fills the cost placeholders in the generated HTML viewer.

use chrono::Utc;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};

use super::{SessionRecord, UsageFile, UsageSummary};
use crate::fsutil;
use crate::types::Result;

pub const COST_REPORT_FILENAME: &str = "cost_statistics.md";
pub const HTML_REPORT_FILENAME: &str = "Test_Report_Viewer.html";

// Input vs cache-read rate used to estimate caching savings.
const CACHE_SAVINGS_PER_MILLION: f64 = 3.00 - 0.30;
const OUTPUT_COST_SHARE_WARNING: f64 = 70.0;

/// `1234567` -> `1,234,567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Render the markdown cost report.
pub fn render_markdown(project_name: &str, usage: &UsageFile) -> String {
    let summary = &usage.summary;
    let sessions = &usage.sessions;
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "# Cost Statistics Report\n");
    let _ = writeln!(
        out,
        "**Generated:** {} UTC\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(out, "**Project:** {project_name}\n");
    out.push_str("---\n\n## Executive Summary\n\n");
    out.push_str("| Metric | Value |\n|--------|-------|\n");
    let _ = writeln!(out, "| Total Sessions | {} |", summary.total_sessions);
    let _ = writeln!(out, "| Total Tokens | {} |", group_thousands(summary.total_tokens));
    let _ = writeln!(out, "| Total Cost | ${:.4} |", summary.total_cost_usd);
    if summary.total_sessions > 0 {
        let _ = writeln!(out, "| Average Cost per Session | ${:.4} |", summary.average_cost());
    }

    out.push_str("\n---\n\n## Token Usage Breakdown\n\n");
    out.push_str("| Token Type | Count | Percentage | Cost |\n");
    out.push_str("|------------|-------|------------|------|\n");
    let total = summary.total_tokens;
    if total > 0 {
        let sum_cost = |f: fn(&SessionRecord) -> f64| sessions.iter().map(f).sum::<f64>();
        let rows = [
            ("Input Tokens", summary.total_input_tokens, sum_cost(|s| s.costs.input_cost)),
            ("Output Tokens", summary.total_output_tokens, sum_cost(|s| s.costs.output_cost)),
            (
                "Cache Creation",
                summary.total_cache_creation_tokens,
                sum_cost(|s| s.costs.cache_creation_cost),
            ),
            (
                "Cache Read",
                summary.total_cache_read_tokens,
                sum_cost(|s| s.costs.cache_read_cost),
            ),
        ];
        for (label, count, cost) in rows {
            let _ = writeln!(
                out,
                "| {label} | {} | {:.1}% | ${cost:.4} |",
                group_thousands(count),
                pct(count, total)
            );
        }
        let _ = writeln!(
            out,
            "| **Total** | **{}** | **100%** | **${:.4}** |",
            group_thousands(total),
            summary.total_cost_usd
        );
    }

    out.push_str("\n---\n\n## Session Details\n\n");
    out.push_str("| Session | Type | Duration | Tokens | Cost |\n");
    out.push_str("|---------|------|----------|--------|------|\n");
    for (i, s) in sessions.iter().enumerate() {
        let _ = writeln!(
            out,
            "| {} | {} | {:.1}s | {} | ${:.4} |",
            i + 1,
            s.session_type.label(),
            s.duration_ms as f64 / 1000.0,
            group_thousands(s.tokens.total_tokens),
            s.costs.total_cost
        );
    }

    out.push_str("\n---\n\n## Cost Optimization Recommendations\n");
    for rec in recommendations(summary, sessions) {
        let _ = write!(out, "\n{rec}\n");
    }
    out.push_str(
        "\n---\n\n**Note:** Costs are estimates based on published pricing \
         and may not reflect actual billing.\n",
    );
    out
}

fn recommendations(summary: &UsageSummary, sessions: &[SessionRecord]) -> Vec<String> {
    let mut recs = Vec::new();
    let total = summary.total_tokens;

    let cache_read = summary.total_cache_read_tokens;
    if total > 0 && cache_read > 0 {
        let savings = cache_read as f64 / 1_000_000.0 * CACHE_SAVINGS_PER_MILLION;
        recs.push(format!(
            "**Prompt Caching Efficiency**: {:.1}% of tokens were cache reads, \
             saving approximately ${savings:.4}. \
             Consider increasing prompt caching coverage for more savings.",
            pct(cache_read, total)
        ));
    }

    if total > 0 && summary.total_cost_usd > 0.0 {
        let output_cost: f64 = sessions.iter().map(|s| s.costs.output_cost).sum();
        let share = output_cost / summary.total_cost_usd * 100.0;
        if share > OUTPUT_COST_SHARE_WARNING {
            recs.push(format!(
                "**Output Token Optimization**: Output tokens account for {share:.1}% of costs. \
                 Review test reports for verbosity and consider more concise outputs."
            ));
        }
    }

    if sessions.len() > 1 {
        let avg_secs = sessions.iter().map(|s| s.duration_ms).sum::<u64>() as f64
            / sessions.len() as f64
            / 1000.0;
        recs.push(format!(
            "**Session Duration**: Average session duration is {avg_secs:.1}s. \
             Consider batching test cases to reduce session overhead."
        ));
    }

    recs
}

/// Most recently modified directory under `reports_dir`.
pub fn latest_report_dir(reports_dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(reports_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Write `cost_statistics.md` into the newest report directory, or the project root.
pub fn write_cost_report(
    project_dir: &Path,
    reports_dir: &str,
    usage: &UsageFile,
) -> Result<PathBuf> {
    let target_dir = latest_report_dir(&project_dir.join(reports_dir))
        .unwrap_or_else(|| project_dir.to_path_buf());
    let project_name = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| project_dir.display().to_string());

    let path = target_dir.join(COST_REPORT_FILENAME);
    fsutil::atomic_write(&path, render_markdown(&project_name, usage).as_bytes())?;
    tracing::info!(path = %path.display(), "cost report written");
    Ok(path)
}

fn format_duration_ms(total_ms: u64) -> String {
    let minutes = total_ms as f64 / 60_000.0;
    if minutes >= 1.0 {
        format!("~{minutes:.0}min")
    } else {
        format!("~{:.0}s", total_ms as f64 / 1000.0)
    }
}

// Rewrite the value of an already rendered
// `<div class="cost-value">..</div> <div class="cost-label">LABEL</div>` pair.
fn replace_cost_value(html: &str, label: &str, value: &str) -> String {
    let pattern = format!(
        r#"(?is)(<div class="cost-value">)[^<]*(</div>\s*<div class="cost-label">\s*{}\s*</div>)"#,
        regex::escape(label)
    );
    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(html, |caps: &Captures<'_>| format!("{}{value}{}", &caps[1], &caps[2]))
            .into_owned(),
        Err(e) => {
            tracing::warn!(label, "bad cost-value pattern: {}", e);
            html.to_string()
        }
    }
}

/// Fill cost statistics into the newest HTML viewer.
///
/// Replaces the `{{...}}` placeholders and also overwrites any values the
/// agent already rendered into the labelled `cost-value` cells. Returns
/// whether the file was changed.
pub fn fill_html_cost_placeholders(
    project_dir: &Path,
    reports_dir: &str,
    usage: &UsageFile,
) -> Result<bool> {
    let Some(latest) = latest_report_dir(&project_dir.join(reports_dir)) else {
        tracing::debug!("no report directories, skipping html cost fill");
        return Ok(false);
    };
    let html_path = latest.join(HTML_REPORT_FILENAME);
    if !html_path.exists() {
        tracing::debug!(path = %html_path.display(), "html report not found");
        return Ok(false);
    }

    let original = fs::read_to_string(&html_path)?;
    let summary = &usage.summary;
    let total_ms: u64 = usage.sessions.iter().map(|s| s.duration_ms).sum();
    let replacements = [
        ("{{TOTAL_COST}}", "Total Cost", format!("${:.4}", summary.total_cost_usd)),
        ("{{TOTAL_TOKENS}}", "Total Tokens", group_thousands(summary.total_tokens)),
        ("{{DURATION}}", "Duration", format_duration_ms(total_ms)),
        ("{{SESSIONS}}", "Sessions", summary.total_sessions.to_string()),
    ];

    let mut html = original.clone();
    for (placeholder, label, value) in &replacements {
        html = html.replace(placeholder, value);
        html = replace_cost_value(&html, label, value);
    }
    if html == original {
        tracing::debug!("no cost placeholders in html report");
        return Ok(false);
    }

    fsutil::atomic_write(&html_path, html.as_bytes())?;
    tracing::info!(path = %html_path.display(), "html report cost statistics updated");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{CostBreakdown, TokenCounts};
    use crate::usage::{RecordedTokens, SessionType};

    fn record(
        kind: SessionType,
        output_tokens: u64,
        output_cost: f64,
        cache_read: u64,
    ) -> SessionRecord {
        let counts = TokenCounts {
            input_tokens: 1_000,
            output_tokens,
            cache_creation_tokens: 0,
            cache_read_tokens: cache_read,
        };
        SessionRecord {
            session_id: "s".into(),
            timestamp: Utc::now(),
            session_type: kind,
            model: "claude-sonnet-4-5-20250929".into(),
            duration_ms: 30_000,
            num_turns: 3,
            tokens: RecordedTokens {
                counts,
                total_tokens: counts.total(),
            },
            costs: CostBreakdown {
                input_cost: 0.003,
                output_cost,
                total_cost: 0.003 + output_cost,
                ..Default::default()
            },
            reported_cost_usd: None,
            resumed: false,
        }
    }

    fn usage(sessions: Vec<SessionRecord>) -> UsageFile {
        let summary = UsageSummary::from_sessions(&sessions);
        UsageFile { sessions, summary }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_report_sections_and_recommendations() {
        let data = usage(vec![
            record(SessionType::Planner, 100_000, 1.5, 50_000),
            record(SessionType::Executor, 100_000, 1.5, 0),
        ]);
        let md = render_markdown("demo", &data);

        assert!(md.contains("**Project:** demo"));
        assert!(md.contains("| Total Sessions | 2 |"));
        assert!(md.contains("| 1 | Planner | 30.0s |"));
        assert!(md.contains("| 2 | Executor |"));
        assert!(md.contains("Prompt Caching Efficiency"));
        assert!(md.contains("Output Token Optimization"));
        assert!(md.contains("Average session duration is 30.0s"));
    }

    #[test]
    fn test_empty_usage_has_no_breakdown_rows() {
        let md = render_markdown("empty", &UsageFile::default());
        assert!(md.contains("| Total Sessions | 0 |"));
        assert!(!md.contains("Average Cost per Session"));
        assert!(!md.contains("| Input Tokens |"));
    }

    #[test]
    fn test_cost_report_goes_to_latest_report_dir() {
        let project = tempfile::tempdir().unwrap();
        let run = project.path().join("test-reports").join("2025-01-01_run");
        fs::create_dir_all(&run).unwrap();

        let path = write_cost_report(project.path(), "test-reports", &usage(vec![])).unwrap();
        assert_eq!(path, run.join(COST_REPORT_FILENAME));
    }

    #[test]
    fn test_cost_report_falls_back_to_project_root() {
        let project = tempfile::tempdir().unwrap();
        let path = write_cost_report(project.path(), "test-reports", &usage(vec![])).unwrap();
        assert_eq!(path, project.path().join(COST_REPORT_FILENAME));
    }

    #[test]
    fn test_html_placeholders_filled() {
        let project = tempfile::tempdir().unwrap();
        let run = project.path().join("test-reports").join("run1");
        fs::create_dir_all(&run).unwrap();
        fs::write(
            run.join(HTML_REPORT_FILENAME),
            "<b>{{TOTAL_COST}}</b><i>{{TOTAL_TOKENS}}</i><u>{{DURATION}}</u><s>{{SESSIONS}}</s>",
        )
        .unwrap();

        let data = usage(vec![
            record(SessionType::Executor, 0, 0.0, 0),
            record(SessionType::Executor, 0, 0.0, 0),
        ]);
        assert!(fill_html_cost_placeholders(project.path(), "test-reports", &data).unwrap());

        let html = fs::read_to_string(run.join(HTML_REPORT_FILENAME)).unwrap();
        assert_eq!(html, "<b>$0.0060</b><i>2,000</i><u>~1min</u><s>2</s>");
        assert!(!fill_html_cost_placeholders(project.path(), "test-reports", &data).unwrap());
    }

    #[test]
    fn test_html_rendered_cost_values_overwritten() {
        let project = tempfile::tempdir().unwrap();
        let run = project.path().join("test-reports").join("run1");
        fs::create_dir_all(&run).unwrap();
        let rendered = r#"<div class="cost-card">
  <div class="cost-value">$0.00</div>
  <div class="cost-label">Total Cost</div>
</div>
<div class="cost-card">
  <div class="cost-value">N/A</div>
  <div class="cost-label">Total Tokens</div>
</div>
<div class="cost-card">
  <div class="cost-value">~0s</div>
  <div class="cost-label">Duration</div>
</div>
<div class="cost-card">
  <div class="cost-value">0</div>
  <div class="cost-label">Sessions</div>
</div>
<div class="cost-value">keep me</div><div class="cost-label">Pass Rate</div>"#;
        fs::write(run.join(HTML_REPORT_FILENAME), rendered).unwrap();

        let data = usage(vec![
            record(SessionType::Executor, 0, 0.0, 0),
            record(SessionType::Executor, 0, 0.0, 0),
        ]);
        assert!(fill_html_cost_placeholders(project.path(), "test-reports", &data).unwrap());

        let html = fs::read_to_string(run.join(HTML_REPORT_FILENAME)).unwrap();
        let value = |v: &str| format!("<div class=\"cost-value\">{v}</div>");
        let cost_cell = format!("{}\n  <div class=\"cost-label\">Total Cost", value("$0.0060"));
        assert!(html.contains(&cost_cell));
        assert!(html.contains(&value("2,000")));
        assert!(html.contains(&value("~1min")));
        assert!(html.contains(&format!("{}\n  <div class=\"cost-label\">Sessions", value("2"))));
        assert!(html.contains(&value("keep me")));
        assert!(!fill_html_cost_placeholders(project.path(), "test-reports", &data).unwrap());
    }
}
