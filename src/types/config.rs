//! Configuration structures.
//!
//! Configuration is loaded from an optional JSON file, then environment
//! variables, then CLI flags (applied by the binary).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::{Error, Result};

/// Public LiteLLM pricing table.
pub const DEFAULT_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Default model (Bedrock inference profile id).
pub const DEFAULT_MODEL: &str = "us.anthropic.claude-sonnet-4-5-20250929-v1:0";

/// Global orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Campaign loop configuration.
    #[serde(default)]
    pub campaign: CampaignConfig,

    /// Session resume policy.
    #[serde(default)]
    pub resume: ResumePolicy,

    /// Pricing resolution.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// External agent invocation.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from an optional JSON file, then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => Error::file_not_found(path),
                    _ => Error::Io(e),
                })?;
                serde_json::from_str::<Config>(&raw)
                    .map_err(|e| Error::parse(path, e.to_string()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(hours) = std::env::var("PRICING_CACHE_HOURS") {
            let hours: u64 = hours.trim().parse().map_err(|_| {
                Error::config(format!("PRICING_CACHE_HOURS is not a number: {hours}"))
            })?;
            self.pricing.cache_validity = Duration::from_secs(hours * 3600);
        }
        if let Ok(secs) = std::env::var("CAMPAIGN_RESUME_TTL_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::config(format!("CAMPAIGN_RESUME_TTL_SECS is not a number: {secs}"))
            })?;
            self.resume.cache_ttl = Duration::from_secs(secs);
        }
        if let Ok(model) = std::env::var("CAMPAIGN_MODEL") {
            if !model.trim().is_empty() {
                self.campaign.model = model;
            }
        }
        Ok(())
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.campaign.model.trim().is_empty() {
            return Err(Error::config("model is required"));
        }
        if self.campaign.idle_iteration_cap == 0 {
            return Err(Error::config("idle_iteration_cap must be at least 1"));
        }
        if self.campaign.max_iterations == Some(0) {
            return Err(Error::config("max_iterations must be at least 1 when set"));
        }
        if self.campaign.session_timeout == Some(Duration::ZERO) {
            return Err(Error::config("session_timeout must be positive when set"));
        }
        if self.agent.context_window_tokens == 0 {
            return Err(Error::config("context_window_tokens must be positive"));
        }
        Ok(())
    }
}

/// Campaign loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Project directory holding the ledger and orchestrator state files.
    pub project_dir: PathBuf,

    /// Model id passed to the agent and used for pricing.
    pub model: String,

    /// Stop after this many iterations (unlimited when unset).
    pub max_iterations: Option<u32>,

    /// Pause between invocations.
    #[serde(with = "humantime_serde")]
    pub inter_session_delay: Duration,

    /// Consecutive iterations without a not_run change before giving up.
    pub idle_iteration_cap: u32,

    /// Wall-clock limit for one agent invocation (unlimited when unset).
    ///
    /// A session that runs past it is aborted and classified as an error; the
    /// campaign carries on with a fresh session.
    #[serde(with = "humantime_serde")]
    pub session_timeout: Option<Duration>,

    /// Reports tree, relative to the project directory.
    pub reports_dir: String,

    /// Directory with prompt overrides (built-in prompts when unset).
    pub prompts_dir: Option<PathBuf>,

    /// Test spec copied into a fresh project before planning.
    pub test_spec: Option<PathBuf>,

    /// Run a final reporting invocation after all cases complete.
    pub run_reporting_session: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("autonomous_test_project"),
            model: DEFAULT_MODEL.to_string(),
            max_iterations: None,
            inter_session_delay: Duration::from_secs(3),
            idle_iteration_cap: 3,
            session_timeout: None,
            reports_dir: "test-reports".to_string(),
            prompts_dir: None,
            test_spec: None,
            run_reporting_session: true,
        }
    }
}

/// Session resume policy.
///
/// Both limits are policy constants; the TTL mirrors the provider's own
/// prompt-cache lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumePolicy {
    /// Resume only if the previous session ended within this window.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Stop resuming after this many consecutive resumed sessions without progress.
    pub max_resumes_without_progress: u32,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            max_resumes_without_progress: 2,
        }
    }
}

/// Pricing resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Directory holding the pricing cache file.
    pub cache_dir: PathBuf,

    /// Cache age below which the network is not consulted.
    #[serde(with = "humantime_serde")]
    pub cache_validity: Duration,

    /// Pricing table URL.
    pub source_url: String,

    /// Network timeout for the pricing fetch.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for PricingConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: home.join(".cache").join("e2e-agent"),
            cache_validity: Duration::from_secs(24 * 3600),
            source_url: DEFAULT_PRICING_URL.to_string(),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// External agent invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI executable.
    pub command: PathBuf,

    /// Turn budget per invocation.
    pub max_turns: u32,

    /// Context window size used for utilization logging.
    pub context_window_tokens: u64,

    /// Tool-progress events are logged only past this elapsed time.
    #[serde(with = "humantime_serde")]
    pub tool_progress_log_threshold: Duration,

    /// Text appended to the agent's system prompt.
    pub append_system_prompt: Option<String>,

    /// Extra CLI arguments (permission mode, MCP config, plugin dirs).
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("claude"),
            max_turns: 100,
            context_window_tokens: 200_000,
            tool_progress_log_threshold: Duration::from_secs(5),
            append_system_prompt: None,
            extra_args: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Context window for a model id; a `[1m]` suffix selects the 1M window.
    pub fn context_window_for(&self, model: &str) -> u64 {
        if model.trim_end().to_ascii_lowercase().ends_with("[1m]") {
            1_000_000
        } else {
            self.context_window_tokens
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level used when RUST_LOG is unset.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
