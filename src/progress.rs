//! Test-case ledger reading and progress statistics.
//!
//! The ledger (`test_cases.json`) is written by the external agent and is
//! read-only here. Accepted shapes:
//!
//! ```json
//! [ { "case_id": "TC-001", "status": "Not Run", ... } ]
//! { "test_suite": "...", "test_cases": [ ... ] }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::types::{CaseId, Error, Result};

/// Ledger file name inside the project directory. The agent prompts name it too.
pub const LEDGER_FILENAME: &str = "test_cases.json";

/// Ledger reads larger than this are refused.
pub const MAX_LEDGER_BYTES: u64 = 20 * 1024 * 1024;

/// Execution status of a single test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum TestCaseStatus {
    #[default]
    #[serde(rename = "Not Run")]
    NotRun,
    Pass,
    Fail,
    Blocked,
}

impl TestCaseStatus {
    /// Lenient parse. Anything unrecognised counts as not run.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Pass" | "Passed" | "pass" | "passed" => TestCaseStatus::Pass,
            "Fail" | "Failed" | "fail" | "failed" => TestCaseStatus::Fail,
            "Blocked" | "blocked" => TestCaseStatus::Blocked,
            _ => TestCaseStatus::NotRun,
        }
    }
}

impl<'de> Deserialize<'de> for TestCaseStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(match raw {
            Some(Value::String(s)) => TestCaseStatus::parse(&s),
            _ => TestCaseStatus::NotRun,
        })
    }
}

/// One entry of the ledger.
///
/// Only `status` drives the counts. The other fields are read best-effort: a
/// value of an unexpected type is coerced or dropped, never an error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TestCase {
    #[serde(
        default,
        alias = "test_case_id",
        alias = "id",
        alias = "caseId",
        deserialize_with = "lenient_case_id"
    )]
    pub case_id: Option<CaseId>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_steps")]
    pub steps: Vec<Value>,
    #[serde(default)]
    pub status: TestCaseStatus,
    #[serde(default, alias = "actualResult", deserialize_with = "lenient_opt_text")]
    pub actual_result: Option<String>,
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_case_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<CaseId>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .and_then(scalar_text)
        .and_then(|s| CaseId::from_string(s).ok()))
}

fn lenient_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<String, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(scalar_text).unwrap_or_default())
}

fn lenient_opt_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(scalar_text))
}

fn lenient_steps<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<Value>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(steps)) => steps,
        Some(other) => vec![other],
    })
}

impl TestCase {
    /// Decode one ledger entry. Entries that are not objects count as not run.
    pub fn from_entry(entry: Value) -> Self {
        serde_json::from_value(entry).unwrap_or_default()
    }
}

/// Status counts for one ledger snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseStats {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub blocked: u32,
    pub not_run: u32,
}

impl TestCaseStats {
    pub fn from_cases(cases: &[TestCase]) -> Self {
        let mut stats = TestCaseStats::default();
        for case in cases {
            stats.total += 1;
            match case.status {
                TestCaseStatus::Pass => stats.passed += 1,
                TestCaseStatus::Fail => stats.failed += 1,
                TestCaseStatus::Blocked => stats.blocked += 1,
                TestCaseStatus::NotRun => stats.not_run += 1,
            }
        }
        stats
    }

    pub fn completed(&self) -> u32 {
        self.passed + self.failed + self.blocked
    }

    /// Percentage of cases with a terminal status.
    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed()) / f64::from(self.total) * 100.0
        }
    }

    /// Percentage of completed cases that passed.
    pub fn pass_rate(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(completed) * 100.0
        }
    }
}

/// Load all test cases from a ledger file.
///
/// Errors: `FileNotFound` when absent, `Oversize` above [`MAX_LEDGER_BYTES`],
/// `Parse` for malformed JSON or a non-array `test_cases` field.
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCase>> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::file_not_found(path))
        }
        Err(e) => return Err(e.into()),
    };
    if size > MAX_LEDGER_BYTES {
        return Err(Error::Oversize {
            path: path.to_path_buf(),
            size,
            max: MAX_LEDGER_BYTES,
        });
    }

    let raw = fs::read(path)?;
    let doc: Value = serde_json::from_slice(&raw).map_err(|e| Error::parse(path, e.to_string()))?;
    let entries = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map
            .remove("test_cases")
            .or_else(|| map.remove("testCases"))
        {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::parse(
                    path,
                    format!("test_cases is not an array: {other}"),
                ))
            }
            None => return Ok(Vec::new()),
        },
        other => {
            tracing::warn!(
                path = %path.display(),
                "ledger has unexpected top-level shape: {}",
                other
            );
            return Ok(Vec::new());
        }
    };
    Ok(entries.into_iter().map(TestCase::from_entry).collect())
}

/// Stats for the ledger at `path`. Absent or unreadable ledgers read as zero.
pub fn stats_for_ledger(path: &Path) -> TestCaseStats {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "ledger not found");
        return TestCaseStats::default();
    }
    match load_test_cases(path) {
        Ok(cases) => TestCaseStats::from_cases(&cases),
        Err(e) => {
            tracing::error!(path = %path.display(), "error reading ledger: {}", e);
            TestCaseStats::default()
        }
    }
}

/// Stats for `test_cases.json` in the project directory.
pub fn count_test_cases(project_dir: &Path) -> TestCaseStats {
    stats_for_ledger(&project_dir.join(LEDGER_FILENAME))
}

/// Count `defect-reports/DEFECT-*.md` files anywhere under `project_dir/reports_dir`.
pub fn count_defects(project_dir: &Path, reports_dir: &str) -> usize {
    let root = project_dir.join(reports_dir);
    if !root.exists() {
        return 0;
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_defect_report(e.path()))
        .count()
}

fn is_defect_report(path: &Path) -> bool {
    let in_defect_dir = path
        .parent()
        .and_then(|p| p.file_name())
        .is_some_and(|name| name == "defect-reports");
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    in_defect_dir && name.starts_with("DEFECT-") && name.ends_with(".md")
}

/// Log a progress snapshot with derived rates and the defect count.
pub fn log_progress_summary(stats: &TestCaseStats, defects: usize) {
    if stats.total == 0 {
        tracing::info!("test progress: ledger not yet created");
        return;
    }
    tracing::info!(
        total = stats.total,
        completed = stats.completed(),
        completion_pct = %format!("{:.1}", stats.completion_rate()),
        passed = stats.passed,
        pass_pct = %format!("{:.1}", stats.pass_rate()),
        failed = stats.failed,
        blocked = stats.blocked,
        not_run = stats.not_run,
        defects,
        "test execution progress"
    );
}
