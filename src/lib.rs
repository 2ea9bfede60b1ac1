//! # Campaign Orchestrator - Session Loop for Agent-Driven Test Campaigns
//!
//! Drives an external coding agent through a long-running test campaign:
//! - Plans a test-case ledger, then executes it one bounded session at a time
//! - Resumes provider sessions while the prompt cache is warm and progress is real
//! - Detects idle loops, all-blocked ledgers and completion from the ledger alone
//! - Records per-session token usage and cost, with a markdown cost report
//!
//! ## Architecture
//!
//! One invocation is in flight at a time. All shared state lives in files in
//! the project directory:
//! ```text
//!                    ┌──────────────────────────────────┐
//!                    │          Campaign loop           │
//!   test_spec.txt →  │  ┌─────────┐ ┌──────────┐        │  → cost_statistics.md
//!                    │  │ Resume  │ │ Progress │        │
//!                    │  │ engine  │ │ stats    │        │
//!                    │  └─────────┘ └──────────┘        │
//!                    │  ┌─────────┐ ┌──────────┐        │
//!                    │  │ Usage   │ │ Pricing  │        │
//!                    │  │ ledger  │ │ resolver │        │
//!                    │  └─────────┘ └──────────┘        │
//!                    └────────────────┬─────────────────┘
//!                                     │ AgentBackend
//!                                     ↓
//!                           external agent (writes test_cases.json)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod agent;
pub mod campaign;
pub mod pricing;
pub mod progress;
pub mod resume;
pub mod types;
pub mod usage;

// Internal utilities
pub mod fsutil;
pub mod observability;
pub mod recovery;

pub use agent::{AgentBackend, ClaudeCliBackend, ScriptedBackend};
pub use campaign::{Campaign, CampaignOutcome, CampaignReport};
pub use types::{Config, Error, Result};
