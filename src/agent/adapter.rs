//! Session Run Adapter: one invocation in, one [`SessionResult`] out.
//!
//! The stream is drained to the end even after an error marker shows up, so
//! the terminal result (and its usage) is still captured. Outcome
//! classification happens exactly once, after the stream ends.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::events::{text_of, AgentEvent, ContentBlock, ResultEvent};
use super::{AgentBackend, AgentRequest};
use crate::pricing::TokenCounts;
use crate::recovery::with_recovery_async;
use crate::types::{AgentConfig, AgentSessionId, Error, Result};

/// Structured code for context exhaustion.
pub const CONTEXT_OVERFLOW_CODE: &str = "context_length_exceeded";

/// Free-text markers of context exhaustion, matched as substrings.
pub const CONTEXT_OVERFLOW_MARKERS: &[&str] = &[
    "Input is too long",
    "CONTEXT_LENGTH_EXCEEDED",
    "context_length_exceeded",
    "maximum context length",
];

/// Error text of a session cut short by the abort signal.
pub const ABORTED_MESSAGE: &str = "session aborted";

/// Terminal status of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Continue,
    ContextOverflow,
    Error,
    /// Only ever stamped by the loop when the campaign finishes.
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Continue => "continue",
            SessionStatus::ContextOverflow => "context_overflow",
            SessionStatus::Error => "error",
            SessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage reported by the terminal result event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUsage {
    pub tokens: TokenCounts,
    pub total_cost_usd: Option<f64>,
    pub duration_ms: u64,
    pub num_turns: u32,
}

/// Reduced outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub status: SessionStatus,
    pub response_text: String,
    pub usage: Option<SessionUsage>,
    pub session_id: Option<AgentSessionId>,
    pub error_text: Option<String>,
    pub error_hint: Option<&'static str>,
    pub compactions: u32,
}

impl SessionResult {
    /// The failure as an [`Error`], if the session did not finish cleanly.
    pub fn error(&self) -> Option<Error> {
        let text = self.error_text.clone().unwrap_or_default();
        match self.status {
            SessionStatus::ContextOverflow => Some(Error::context_overflow(text)),
            SessionStatus::Error => Some(Error::agent(text)),
            SessionStatus::Continue | SessionStatus::Completed => None,
        }
    }
}

/// Adapter tuning, derived from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub context_window_tokens: u64,
    pub tool_progress_log_threshold: Duration,
}

impl SessionOptions {
    pub fn for_model(config: &AgentConfig, model: &str) -> Self {
        Self {
            context_window_tokens: config.context_window_for(model),
            tool_progress_log_threshold: config.tool_progress_log_threshold,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::for_model(&AgentConfig::default(), "")
    }
}

/// Classify a finished invocation.
///
/// A structured overflow code wins; otherwise the error text is searched for
/// the known overflow markers.
pub fn classify_outcome(
    errored: bool,
    error_text: Option<&str>,
    error_code: Option<&str>,
) -> SessionStatus {
    if !errored {
        return SessionStatus::Continue;
    }
    if error_code.is_some_and(|code| code.eq_ignore_ascii_case(CONTEXT_OVERFLOW_CODE)) {
        return SessionStatus::ContextOverflow;
    }
    let text = error_text.unwrap_or_default();
    if CONTEXT_OVERFLOW_MARKERS.iter().any(|marker| text.contains(marker)) {
        SessionStatus::ContextOverflow
    } else {
        SessionStatus::Error
    }
}

// Mutable accumulator for one stream.
#[derive(Debug, Default)]
struct StreamState {
    session_id: Option<AgentSessionId>,
    response_text: String,
    usage: Option<SessionUsage>,
    errored: bool,
    error_text: Option<String>,
    error_code: Option<String>,
    error_hint: Option<&'static str>,
    compactions: u32,
    last_event_at: Option<Instant>,
}

impl StreamState {
    fn record_error(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.errored = true;
        self.error_text = Some(match self.error_text.take() {
            Some(existing) if !existing.contains(&text) => format!("{existing}\n{text}"),
            Some(existing) => existing,
            None => text,
        });
    }

    fn set_session_id(&mut self, id: Option<AgentSessionId>) {
        if let Some(id) = id.filter(|id| !id.as_str().trim().is_empty()) {
            self.session_id = Some(id);
        }
    }

    fn apply(&mut self, event: AgentEvent, options: &SessionOptions) {
        match event {
            AgentEvent::Init(init) => {
                tracing::info!(
                    session_id = init.session_id.as_ref().map(|s| s.as_str()).unwrap_or("-"),
                    model = init.model.as_deref().unwrap_or("-"),
                    "agent session started"
                );
                self.set_session_id(init.session_id);
            }
            AgentEvent::Assistant { blocks, error } => {
                self.handle_blocks(&blocks);
                let text = text_of(&blocks);
                self.response_text.push_str(&text);
                if let Some(marker) = error {
                    tracing::warn!(
                        code = %marker.code,
                        message = %marker.message,
                        "agent reported an API error"
                    );
                    if let Some(hint) = marker.kind.hint() {
                        tracing::warn!("hint: {}", hint);
                        self.error_hint = Some(hint);
                    }
                    self.error_code.get_or_insert(marker.code);
                    self.record_error(marker.message);
                }
            }
            AgentEvent::User { blocks } => self.handle_blocks(&blocks),
            AgentEvent::ToolProgress(progress) => {
                if progress.elapsed > options.tool_progress_log_threshold {
                    tracing::info!(
                        tool = %progress.tool_name,
                        elapsed_s = progress.elapsed.as_secs_f64(),
                        "tool still running"
                    );
                }
            }
            AgentEvent::Result(result) => self.handle_result(result, options),
            AgentEvent::CompactBoundary(compact) => {
                self.compactions += 1;
                tracing::info!(
                    trigger = compact.trigger.as_deref().unwrap_or("-"),
                    pre_tokens = compact.pre_tokens.unwrap_or(0),
                    "agent compacted its context"
                );
            }
            AgentEvent::Passthrough { kind, .. } => {
                tracing::trace!(kind = %kind, "passthrough event");
            }
        }
    }

    fn handle_blocks(&mut self, blocks: &[ContentBlock]) {
        let now = Instant::now();
        for block in blocks {
            match block {
                ContentBlock::ToolUse { name, .. } => {
                    let thinking = self.last_event_at.map(|t| now - t).unwrap_or_default();
                    tracing::info!(tool = %name, after_s = thinking.as_secs_f64(), "tool call");
                }
                ContentBlock::ToolResult { content, is_error, .. } => {
                    if *is_error {
                        tracing::warn!(result = %truncate(content, 200), "tool returned an error");
                    } else {
                        tracing::debug!(result = %truncate(content, 200), "tool result");
                    }
                    self.last_event_at = Some(now);
                }
                ContentBlock::Text(text) => tracing::debug!(text = %text, "assistant text"),
                ContentBlock::Thinking(_) | ContentBlock::Other(_) => {}
            }
        }
    }

    fn handle_result(&mut self, result: ResultEvent, options: &SessionOptions) {
        self.set_session_id(result.session_id.clone());
        if let Some(tokens) = result.usage {
            let used = tokens.input_tokens + tokens.cache_read_tokens + tokens.output_tokens;
            let window = options.context_window_tokens.max(1);
            tracing::info!(
                used_tokens = used,
                window_tokens = window,
                utilization_pct = %format!("{:.1}", used as f64 / window as f64 * 100.0),
                "context window utilization"
            );
            self.usage = Some(SessionUsage {
                tokens,
                total_cost_usd: result.total_cost_usd,
                duration_ms: result.duration_ms,
                num_turns: result.num_turns,
            });
        }
        if !result.is_success() {
            if let Some(code) = &result.error_code {
                self.error_code.get_or_insert(code.clone());
            }
            self.record_error(result.error_text());
        } else if self.response_text.is_empty() {
            if let Some(text) = result.result {
                self.response_text = text;
            }
        }
    }

    fn finish(self) -> SessionResult {
        let status = classify_outcome(
            self.errored,
            self.error_text.as_deref(),
            self.error_code.as_deref(),
        );
        SessionResult {
            status,
            response_text: self.response_text,
            usage: self.usage,
            session_id: self.session_id,
            error_text: self.error_text,
            error_hint: self.error_hint,
            compactions: self.compactions,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// Message suitable for session error text.
fn error_message(err: &Error) -> String {
    match err {
        Error::Agent(msg) | Error::Cancelled(msg) | Error::ContextOverflow(msg) => msg.clone(),
        other => other.to_string(),
    }
}

async fn drain<B>(
    backend: &B,
    request: AgentRequest,
    options: &SessionOptions,
    state: &mut StreamState,
) -> Result<()>
where
    B: AgentBackend + ?Sized,
{
    let abort = request.abort.clone();
    if abort.is_cancelled() {
        return Err(Error::cancelled(ABORTED_MESSAGE));
    }

    let mut stream = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(Error::cancelled(ABORTED_MESSAGE)),
        started = backend.start(request) => started?,
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(Error::cancelled(ABORTED_MESSAGE)),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => state.apply(event, options),
            Some(Err(e)) => return Err(e),
            None => return Ok(()),
        }
    }
}

/// Drive one invocation to completion.
///
/// Never fails: start errors, stream errors, aborts and panics all become
/// error text on an `Error`-classified result.
pub async fn run_session<B>(
    backend: &B,
    request: AgentRequest,
    options: &SessionOptions,
) -> SessionResult
where
    B: AgentBackend + ?Sized,
{
    let started = Instant::now();
    let resumed = request.resume_session_id.is_some();
    let mut state = StreamState::default();

    let drained =
        with_recovery_async(drain(backend, request, options, &mut state), "agent stream").await;
    if let Err(e) = drained {
        state.record_error(error_message(&e));
    }

    let result = state.finish();
    match result.status {
        SessionStatus::Continue => tracing::info!(
            backend = backend.name(),
            resumed,
            elapsed_s = started.elapsed().as_secs(),
            "agent session finished"
        ),
        status => tracing::warn!(
            backend = backend.name(),
            resumed,
            status = %status,
            error = result.error_text.as_deref().unwrap_or(""),
            elapsed_s = started.elapsed().as_secs(),
            "agent session failed"
        ),
    }
    result
}
