//! External agent boundary.
//!
//! The agent is a black box reachable through [`AgentBackend`]: one request in,
//! one asynchronous stream of [`AgentEvent`]s out. [`run_session`] drives a
//! single invocation and reduces the stream to a [`SessionResult`].
//!
//! Backends:
//! - [`ClaudeCliBackend`]: spawns the agent CLI in stream-json mode
//! - [`ScriptedBackend`]: replays canned sessions, for tests

mod adapter;
mod claude_cli;
pub mod events;
mod scripted;

pub use adapter::{
    classify_outcome, run_session, SessionOptions, SessionResult, SessionStatus, SessionUsage,
    ABORTED_MESSAGE, CONTEXT_OVERFLOW_CODE, CONTEXT_OVERFLOW_MARKERS,
};
pub use claude_cli::ClaudeCliBackend;
pub use events::{AgentEvent, ApiErrorKind, ContentBlock, ResultEvent};
pub use scripted::{ScriptedBackend, ScriptedSession, ScriptedStep};

use async_trait::async_trait;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::types::{AgentSessionId, Result};

/// Event stream of one invocation. Errors end the stream.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub model: String,
    /// Provider conversation to continue, if any.
    pub resume_session_id: Option<AgentSessionId>,
    /// Working directory of the agent (the project directory).
    pub cwd: PathBuf,
    /// Cooperative abort signal.
    pub abort: CancellationToken,
}

/// Something that can run an agent invocation.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start an invocation. Failing to start is an error; failures after
    /// start arrive as stream items.
    async fn start(&self, request: AgentRequest) -> Result<AgentEventStream>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
