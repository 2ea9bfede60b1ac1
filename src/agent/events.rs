//! Typed view of the agent's stream-json event protocol.
//!
//! Each stdout line is one JSON object discriminated by `type` (and for
//! `system` events, `subtype`). Kinds we do not model are kept verbatim in
//! [`AgentEvent::Passthrough`], so new upstream event types never break
//! decoding or outcome classification.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::pricing::TokenCounts;
use crate::types::{AgentSessionId, Error, Result};

// =============================================================================
// API error markers
// =============================================================================

/// Kind of API failure embedded in an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Authentication,
    Billing,
    RateLimit,
    InvalidRequest,
    Server,
    Unknown,
}

impl ApiErrorKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "authentication_failed" | "authentication_error" => ApiErrorKind::Authentication,
            "billing_error" => ApiErrorKind::Billing,
            "rate_limit" | "rate_limit_error" => ApiErrorKind::RateLimit,
            "invalid_request" | "invalid_request_error" => ApiErrorKind::InvalidRequest,
            "server_error" | "overloaded_error" | "api_error" => ApiErrorKind::Server,
            _ => ApiErrorKind::Unknown,
        }
    }

    /// Operator-facing hint. Never replaces the raw marker text.
    pub fn hint(self) -> Option<&'static str> {
        match self {
            ApiErrorKind::Authentication => {
                Some("check that the agent is logged in and the API credentials are valid")
            }
            ApiErrorKind::Billing => Some("check the account's billing status and credit balance"),
            ApiErrorKind::RateLimit => {
                Some("rate limited; the next session starts after the inter-session delay")
            }
            ApiErrorKind::InvalidRequest => {
                Some("the request was rejected; check the model id and prompt size")
            }
            ApiErrorKind::Server | ApiErrorKind::Unknown => None,
        }
    }
}

/// Error marker carried by an assistant message.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiErrorMarker {
    pub kind: ApiErrorKind,
    /// Marker as sent by the agent (`"rate_limit"`, ...).
    pub code: String,
    /// Human-readable text of the message that carried the marker.
    pub message: String,
}

// =============================================================================
// Content blocks
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Other(Value),
}

impl ContentBlock {
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| str_field(value, key);
        match value.get("type").and_then(Value::as_str) {
            Some("text") => ContentBlock::Text(field("text")),
            Some("thinking") => ContentBlock::Thinking(field("thinking")),
            Some("tool_use") => ContentBlock::ToolUse {
                id: field("id"),
                name: field("name"),
                input: value.get("input").cloned().unwrap_or(Value::Null),
            },
            Some("tool_result") => ContentBlock::ToolResult {
                tool_use_id: field("tool_use_id"),
                content: flatten_text(value.get("content")),
                is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            },
            _ => ContentBlock::Other(value.clone()),
        }
    }
}

// Tool results and user messages carry either a string or a list of text blocks.
fn flatten_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn message_blocks(value: &Value) -> Vec<ContentBlock> {
    match value.pointer("/message/content") {
        Some(Value::Array(items)) => items.iter().map(ContentBlock::from_value).collect(),
        Some(Value::String(s)) => vec![ContentBlock::Text(s.clone())],
        _ => Vec::new(),
    }
}

/// Concatenated text of all `Text` blocks.
pub fn text_of(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InitEvent {
    #[serde(default)]
    pub session_id: Option<AgentSessionId>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolProgressEvent {
    pub tool_use_id: String,
    pub tool_name: String,
    pub elapsed: Duration,
}

/// Terminal event of an invocation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub session_id: Option<AgentSessionId>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<TokenCounts>,
    /// Final assistant text (success) or error text.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Structured error code, when the agent exposes one.
    #[serde(default)]
    pub error_code: Option<String>,
}

impl ResultEvent {
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    /// Best available error description for a failed result.
    pub fn error_text(&self) -> String {
        if !self.errors.is_empty() {
            return self.errors.join("; ");
        }
        match self.result.as_deref() {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => format!("agent session ended with subtype '{}'", self.subtype),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactBoundaryEvent {
    pub trigger: Option<String>,
    pub pre_tokens: Option<u64>,
}

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Init(InitEvent),
    Assistant {
        blocks: Vec<ContentBlock>,
        error: Option<ApiErrorMarker>,
    },
    User {
        blocks: Vec<ContentBlock>,
    },
    ToolProgress(ToolProgressEvent),
    Result(ResultEvent),
    CompactBoundary(CompactBoundaryEvent),
    Passthrough {
        kind: String,
        raw: Value,
    },
}

impl AgentEvent {
    /// Parse one stdout line.
    pub fn from_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::agent(format!("invalid stream event: {e}")))?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        let kind = value.get("type").and_then(Value::as_str).unwrap_or("").to_string();
        let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("");

        match (kind.as_str(), subtype) {
            ("system", "init") => match serde_json::from_value(value.clone()) {
                Ok(init) => AgentEvent::Init(init),
                Err(_) => passthrough(kind, value),
            },
            ("system", "compact_boundary") => {
                let meta = value.get("compact_metadata");
                AgentEvent::CompactBoundary(CompactBoundaryEvent {
                    trigger: meta
                        .and_then(|m| m.get("trigger"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    pre_tokens: meta.and_then(|m| m.get("pre_tokens")).and_then(Value::as_u64),
                })
            }
            ("assistant", _) => {
                let blocks = message_blocks(&value);
                let error = value.get("error").and_then(Value::as_str).map(|code| ApiErrorMarker {
                    kind: ApiErrorKind::parse(code),
                    code: code.to_string(),
                    message: match text_of(&blocks) {
                        t if t.is_empty() => code.to_string(),
                        t => t,
                    },
                });
                AgentEvent::Assistant { blocks, error }
            }
            ("user", _) => AgentEvent::User {
                blocks: message_blocks(&value),
            },
            ("tool_progress", _) => AgentEvent::ToolProgress(ToolProgressEvent {
                tool_use_id: str_field(&value, "tool_use_id"),
                tool_name: str_field(&value, "tool_name"),
                // Negative, non-finite or out-of-range values read as zero.
                elapsed: value
                    .get("elapsed_time_seconds")
                    .and_then(Value::as_f64)
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                    .unwrap_or_default(),
            }),
            ("result", _) => match serde_json::from_value(value.clone()) {
                Ok(result) => AgentEvent::Result(result),
                Err(e) => {
                    tracing::warn!("undecodable result event, treating as failure: {}", e);
                    AgentEvent::Result(ResultEvent {
                        subtype: "error_undecodable_result".to_string(),
                        is_error: true,
                        errors: vec![format!("undecodable result event: {e}")],
                        ..Default::default()
                    })
                }
            },
            _ => passthrough(kind, value),
        }
    }
}

fn passthrough(kind: String, raw: Value) -> AgentEvent {
    AgentEvent::Passthrough { kind, raw }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}
