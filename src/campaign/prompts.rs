//! Prompt selection.
//!
//! Built-in prompts are compiled in; a prompts directory can override any of
//! them file by file.

use std::fs;
use std::path::Path;

use crate::resume::RESUME_PROMPT_SUPPLEMENT;
use crate::types::Result;
use crate::usage::SessionType;

const PLANNER: &str = include_str!("prompts/test_planner_prompt.md");
const EXECUTOR: &str = include_str!("prompts/test_executor_prompt.md");
const REPORTER: &str = include_str!("prompts/test_reporter_prompt.md");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub planner: String,
    pub executor: String,
    pub reporter: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            planner: PLANNER.to_string(),
            executor: EXECUTOR.to_string(),
            reporter: REPORTER.to_string(),
        }
    }
}

impl PromptSet {
    /// Load overrides from `dir`; missing files keep the built-in text.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut prompts = PromptSet::default();
        let Some(dir) = dir else {
            return Ok(prompts);
        };
        for kind in [SessionType::Planner, SessionType::Executor, SessionType::Reporter] {
            let path = dir.join(format!("{}_prompt.md", kind.as_str()));
            if path.exists() {
                let text = fs::read_to_string(&path)?;
                tracing::debug!(path = %path.display(), "prompt override loaded");
                *prompts.slot(kind) = text;
            }
        }
        Ok(prompts)
    }

    fn slot(&mut self, kind: SessionType) -> &mut String {
        match kind {
            SessionType::Planner => &mut self.planner,
            SessionType::Executor => &mut self.executor,
            SessionType::Reporter => &mut self.reporter,
        }
    }

    /// Prompt for a session, with the resume supplement when resuming.
    pub fn for_session(&self, kind: SessionType, resumed: bool) -> String {
        let base = match kind {
            SessionType::Planner => &self.planner,
            SessionType::Executor => &self.executor,
            SessionType::Reporter => &self.reporter,
        };
        if resumed {
            format!("{base}{RESUME_PROMPT_SUPPLEMENT}")
        } else {
            base.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_are_per_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test_executor_prompt.md"), "custom executor").unwrap();

        let prompts = PromptSet::load(Some(dir.path())).unwrap();
        assert_eq!(prompts.executor, "custom executor");
        assert_eq!(prompts.planner, PLANNER);
    }

    #[test]
    fn test_resume_supplement_only_when_resumed() {
        let prompts = PromptSet::default();
        assert!(!prompts
            .for_session(SessionType::Executor, false)
            .contains("Resumed session"));
        assert!(prompts
            .for_session(SessionType::Executor, true)
            .ends_with(RESUME_PROMPT_SUPPLEMENT));
    }
}
