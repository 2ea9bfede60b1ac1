//! Core types for the campaign orchestrator.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (AgentSessionId, CaseId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the loop, resume policy, pricing and agent

mod config;
mod errors;
mod ids;

pub use config::{
    AgentConfig, CampaignConfig, Config, ObservabilityConfig, PricingConfig, ResumePolicy,
    DEFAULT_MODEL, DEFAULT_PRICING_URL,
};
pub use errors::{Error, Result};
pub use ids::{AgentSessionId, CaseId};
