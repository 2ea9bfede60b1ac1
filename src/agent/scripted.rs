//! In-memory agent backend that replays scripted sessions.
//!
//! Each `start` pops the next [`ScriptedSession`], writes its ledger snapshot
//! into the request's working directory (standing in for the real agent's
//! edits to the test-case ledger), and streams its steps.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::{AgentBackend, AgentEvent, AgentEventStream, AgentRequest};
use crate::fsutil;
use crate::progress::LEDGER_FILENAME;
use crate::types::{Error, Result};

/// One step of a scripted stream.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Event(AgentEvent),
    /// End the stream with an error carrying this message.
    Fail(String),
    /// Never yield again; only an abort ends the session.
    Hang,
}

/// A canned invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    pub steps: Vec<ScriptedStep>,
    /// Ledger document written before the stream starts.
    pub ledger: Option<Value>,
}

impl ScriptedSession {
    pub fn from_steps(steps: Vec<ScriptedStep>) -> Self {
        Self { steps, ledger: None }
    }

    /// Init, a line of text, and a successful result with the given usage.
    pub fn success(session_id: &str, input_tokens: u64, output_tokens: u64) -> Self {
        Self::from_steps(vec![
            init(session_id),
            ScriptedStep::Event(AgentEvent::from_value(json!({
                "type": "assistant",
                "session_id": session_id,
                "message": {"content": [{"type": "text", "text": "Updated the test ledger."}]}
            }))),
            ScriptedStep::Event(AgentEvent::from_value(json!({
                "type": "result",
                "subtype": "success",
                "is_error": false,
                "session_id": session_id,
                "duration_ms": 1_000,
                "num_turns": 3,
                "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens}
            }))),
        ])
    }

    /// A session that runs out of context.
    pub fn overflow(session_id: &str) -> Self {
        Self::failure(session_id, "Input is too long for requested model.")
    }

    /// A session whose result reports a failure with `message`.
    pub fn failure(session_id: &str, message: &str) -> Self {
        Self::from_steps(vec![
            init(session_id),
            ScriptedStep::Event(AgentEvent::from_value(json!({
                "type": "result",
                "subtype": "error_during_execution",
                "is_error": true,
                "session_id": session_id,
                "duration_ms": 500,
                "num_turns": 1,
                "errors": [message],
                "usage": {"input_tokens": 100, "output_tokens": 0}
            }))),
        ])
    }

    pub fn with_ledger(mut self, ledger: Value) -> Self {
        self.ledger = Some(ledger);
        self
    }
}

fn init(session_id: &str) -> ScriptedStep {
    ScriptedStep::Event(AgentEvent::from_value(json!({
        "type": "system",
        "subtype": "init",
        "session_id": session_id
    })))
}

/// Replays [`ScriptedSession`]s in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    sessions: Mutex<VecDeque<ScriptedSession>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedBackend {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn start(&self, request: AgentRequest) -> Result<AgentEventStream> {
        let cwd = request.cwd.clone();
        self.requests.lock().await.push(request);
        let session = self
            .sessions
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| Error::agent("scripted backend has no sessions left"))?;

        if let Some(ledger) = &session.ledger {
            fsutil::atomic_write_json(&cwd.join(LEDGER_FILENAME), ledger)?;
        }

        let mut items = Vec::with_capacity(session.steps.len());
        let mut hang = false;
        for step in session.steps {
            match step {
                ScriptedStep::Event(event) => items.push(Ok(event)),
                ScriptedStep::Fail(message) => {
                    items.push(Err(Error::agent(message)));
                    break;
                }
                ScriptedStep::Hang => {
                    hang = true;
                    break;
                }
            }
        }

        let events = stream::iter(items);
        if hang {
            Ok(Box::pin(events.chain(stream::pending())))
        } else {
            Ok(Box::pin(events))
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
