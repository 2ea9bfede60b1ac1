//! Campaign runner - command-line entry point.
//!
//! Subcommands:
//! - `run`: drive a test campaign against a project directory
//! - `stats`: print recorded token usage and cost for a project

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use campaign_orchestrator::campaign::resolve_project_dir;
use campaign_orchestrator::usage::{report, UsageLedger};
use campaign_orchestrator::{Campaign, CampaignOutcome, ClaudeCliBackend, Config, Result};

/// Exit code for fatal errors outside the loop.
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "campaign-runner")]
#[command(
    author,
    version,
    about = "Session orchestrator for agent-driven test campaigns",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, global = true, env = "CAMPAIGN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the campaign loop until a terminal outcome
    Run {
        /// Project directory (relative paths go under generations/)
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Stop after this many agent sessions
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Model id for the agent and for pricing
        #[arg(long)]
        model: Option<String>,

        /// Test specification copied into a fresh project
        #[arg(long)]
        test_spec: Option<PathBuf>,
    },

    /// Show token usage and cost for a project
    Stats {
        /// Project directory (relative paths go under generations/)
        #[arg(long)]
        project_dir: Option<PathBuf>,

        /// Also write cost_statistics.md
        #[arg(long)]
        generate_report: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FATAL);
        }
    };
    campaign_orchestrator::observability::init_tracing(&config.observability);

    let result = match cli.command {
        Commands::Run {
            project_dir,
            max_iterations,
            model,
            test_spec,
        } => {
            let mut config = config;
            if let Some(dir) = project_dir {
                config.campaign.project_dir = dir;
            }
            if max_iterations.is_some() {
                config.campaign.max_iterations = max_iterations;
            }
            if let Some(model) = model {
                config.campaign.model = model;
            }
            if test_spec.is_some() {
                config.campaign.test_spec = test_spec;
            }
            cmd_run(config).await
        }
        Commands::Stats {
            project_dir,
            generate_report,
        } => {
            let dir = project_dir.unwrap_or_else(|| config.campaign.project_dir.clone());
            cmd_stats(&resolve_project_dir(&dir), &config, generate_report).map(|()| 0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn cmd_run(config: Config) -> Result<u8> {
    let backend = ClaudeCliBackend::new(config.agent.clone());
    let mut campaign = Campaign::new(config, backend)?;

    let abort = CancellationToken::new();
    let on_signal = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current session is aborted");
            on_signal.cancel();
        }
    });

    let report = campaign.run(abort).await?;
    if report.outcome == CampaignOutcome::Interrupted {
        tracing::info!(
            project_dir = %campaign.project_dir().display(),
            "run the same command again to resume"
        );
    }
    Ok(u8::try_from(report.exit_code()).unwrap_or(EXIT_FATAL))
}

fn cmd_stats(project_dir: &Path, config: &Config, generate_report: bool) -> Result<()> {
    let usage = UsageLedger::open(project_dir);
    if usage.sessions().is_empty() {
        println!("No usage statistics recorded in {}", project_dir.display());
        return Ok(());
    }

    let name = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| project_dir.display().to_string());
    println!("{}", report::render_markdown(&name, usage.data()));

    if generate_report {
        let reports_dir = &config.campaign.reports_dir;
        let path = report::write_cost_report(project_dir, reports_dir, usage.data())?;
        println!("Cost report written to {}", path.display());
    }
    Ok(())
}
