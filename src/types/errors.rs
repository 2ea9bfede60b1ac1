//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the campaign orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    /// A required file (usually the test-case ledger) does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Malformed JSON in the ledger, usage file, session state or pricing cache.
    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// Ledger exceeds the read size cap.
    #[error("file too large: {} is {size} bytes (max {max} bytes)", path.display())]
    Oversize { path: PathBuf, size: u64, max: u64 },

    /// Pricing fetch failure. Recovered inside the resolver, never surfaced to the loop.
    #[error("network error: {0}")]
    Network(String),

    /// Failure reported by the external agent.
    #[error("agent error: {0}")]
    Agent(String),

    /// Agent failure caused by exhausting the context window.
    #[error("context overflow: {0}")]
    ContextOverflow(String),

    /// Consecutive iterations made no ledger progress.
    #[error("idle loop detected: not_run stayed at {not_run} for {iterations} iterations")]
    IdleLoop { not_run: u32, iterations: u32 },

    /// Every test case is blocked.
    #[error("all {total} test cases are blocked")]
    AllBlocked { total: u32 },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cancellation via the abort token.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn file_not_found(path: impl AsRef<Path>) -> Self {
        Self::FileNotFound(path.as_ref().to_path_buf())
    }

    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn agent(msg: impl Into<String>) -> Self {
        Self::Agent(msg.into())
    }

    pub fn context_overflow(msg: impl Into<String>) -> Self {
        Self::ContextOverflow(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
}
