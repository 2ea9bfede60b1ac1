//! Agent backend that drives the Claude CLI in stream-json mode.
//!
//! The prompt goes to stdin; stdout carries one JSON event per line. A relay
//! task owns the child process and forwards decoded events over a channel.
//! The child is killed when the relay ends early (abort or dropped receiver).
//! A panicking relay surfaces as a stream error, not as a clean end of stream.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{AgentBackend, AgentEvent, AgentEventStream, AgentRequest};
use crate::recovery::with_recovery_async;
use crate::types::{AgentConfig, Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 64;
const STDERR_TAIL_LINES: usize = 20;

/// Spawns the agent CLI per invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    config: AgentConfig,
}

impl ClaudeCliBackend {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Command-line arguments for one request.
    pub fn build_args(&self, request: &AgentRequest) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-p".into(),
            "--output-format".into(),
            "stream-json".into(),
            "--verbose".into(),
            "--model".into(),
            request.model.clone(),
            "--max-turns".into(),
            self.config.max_turns.to_string(),
        ];
        if let Some(id) = &request.resume_session_id {
            args.push("--resume".into());
            args.push(id.as_str().to_string());
        }
        if let Some(extra) = &self.config.append_system_prompt {
            args.push("--append-system-prompt".into());
            args.push(extra.clone());
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }
}

#[async_trait]
impl AgentBackend for ClaudeCliBackend {
    async fn start(&self, request: AgentRequest) -> Result<AgentEventStream> {
        let mut command = Command::new(&self.config.command);
        command
            .args(self.build_args(&request))
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            Error::agent(format!(
                "failed to spawn agent '{}': {e}",
                self.config.command.display()
            ))
        })?;
        tracing::debug!(
            pid = child.id().unwrap_or(0),
            resume = request.resume_session_id.is_some(),
            "agent process spawned"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::agent("agent stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::agent("agent stderr was not captured"))?;

        // Written from a task so a large prompt cannot deadlock against a full stdout pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = request.prompt;
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    tracing::warn!("failed to write prompt to agent stdin: {}", e);
                }
                let _ = stdin.shutdown().await;
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stderr_tail = tokio::spawn(collect_tail(stderr));
        let relay = relay_events(child, stdout, stderr_tail, tx.clone(), request.abort);
        tokio::spawn(supervise_relay(relay, tx));

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn name(&self) -> &str {
        "claude-cli"
    }
}

async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

async fn supervise_relay<F>(relay: F, tx: mpsc::Sender<Result<AgentEvent>>)
where
    F: Future<Output = ()>,
{
    let relayed = with_recovery_async(
        async move {
            relay.await;
            Ok(())
        },
        "agent relay",
    )
    .await;
    if let Err(e) = relayed {
        let _ = tx.send(Err(e)).await;
    }
}

async fn relay_events<R: AsyncRead + Unpin>(
    mut child: Child,
    stdout: R,
    stderr_tail: tokio::task::JoinHandle<String>,
    tx: mpsc::Sender<Result<AgentEvent>>,
    abort: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            _ = abort.cancelled() => {
                tracing::info!("abort requested, killing agent process");
                let _ = child.kill().await;
                return;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match AgentEvent::from_line(trimmed) {
                    Ok(event) => {
                        if tx.send(Ok(event)).await.is_err() {
                            // Receiver gone; dropping the child kills it.
                            return;
                        }
                    }
                    Err(_) => tracing::debug!(line = %trimmed, "non-json agent output"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                let err = Error::agent(format!("agent stdout read failed: {e}"));
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }

    let status = child.wait().await;
    let tail = stderr_tail.await.unwrap_or_default();
    if let Some(err) = exit_error(status, &tail) {
        let _ = tx.send(Err(err)).await;
    }
}

fn exit_error(status: std::io::Result<ExitStatus>, stderr_tail: &str) -> Option<Error> {
    match status {
        Ok(status) if status.success() => None,
        Ok(status) => {
            let detail = if stderr_tail.trim().is_empty() {
                String::new()
            } else {
                format!(": {}", stderr_tail.trim())
            };
            Some(Error::agent(format!("agent exited with {status}{detail}")))
        }
        Err(e) => Some(Error::agent(format!("failed to wait for agent: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentSessionId;
    use std::path::PathBuf;

    fn request(resume: Option<&str>) -> AgentRequest {
        AgentRequest {
            prompt: "run the tests".into(),
            model: "claude-sonnet-4-5-20250929".into(),
            resume_session_id: resume.map(|s| AgentSessionId::from_string(s.to_string()).unwrap()),
            cwd: PathBuf::from("."),
            abort: CancellationToken::new(),
        }
    }

    #[test]
    fn test_args_fresh_session() {
        let backend = ClaudeCliBackend::new(AgentConfig::default());
        let args = backend.build_args(&request(None));
        assert_eq!(
            args,
            vec![
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "claude-sonnet-4-5-20250929",
                "--max-turns",
                "100"
            ]
        );
    }

    #[test]
    fn test_args_resume_and_extras() {
        let backend = ClaudeCliBackend::new(AgentConfig {
            append_system_prompt: Some("be terse".into()),
            extra_args: vec!["--permission-mode".into(), "bypassPermissions".into()],
            ..AgentConfig::default()
        });
        let args = backend.build_args(&request(Some("sess-9")));
        let joined = args.join(" ");
        assert!(joined.contains("--resume sess-9"));
        assert!(joined.contains("--append-system-prompt be terse"));
        assert!(joined.ends_with("--permission-mode bypassPermissions"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_agent_error() {
        let backend = ClaudeCliBackend::new(AgentConfig {
            command: PathBuf::from("/nonexistent/agent-binary"),
            ..AgentConfig::default()
        });
        let err = backend.start(request(None)).await.err().unwrap();
        assert!(matches!(err, Error::Agent(_)));
    }

    async fn exploding_relay(tx: mpsc::Sender<Result<AgentEvent>>) {
        drop(tx);
        panic!("decoder blew up");
    }

    #[tokio::test]
    async fn test_relay_panic_reaches_consumer() {
        let (tx, mut rx) = mpsc::channel(4);
        supervise_relay(exploding_relay(tx.clone()), tx).await;

        match rx.recv().await {
            Some(Err(Error::Agent(msg))) => assert!(msg.contains("decoder blew up")),
            other => panic!("expected relay error, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overflow_survives_hostile_progress_event() {
        use crate::agent::{run_session, SessionOptions, SessionStatus};
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-agent");
        std::fs::write(
            &script,
            r#"#!/bin/sh
cat > /dev/null
echo '{"type":"system","subtype":"init","session_id":"cli-1"}'
echo '{"type":"tool_progress","tool_name":"Bash","elapsed_time_seconds":1e30}'
echo '{"type":"result","subtype":"error_during_execution","is_error":true,'\
'"errors":["Input is too long"],"num_turns":1,"usage":{"input_tokens":10,"output_tokens":1}}'
exit 1
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = ClaudeCliBackend::new(AgentConfig {
            command: script,
            ..AgentConfig::default()
        });
        let mut req = request(None);
        req.cwd = dir.path().to_path_buf();
        let result = run_session(&backend, req, &SessionOptions::default()).await;

        assert_eq!(result.status, SessionStatus::ContextOverflow);
        assert_eq!(result.session_id.unwrap().as_str(), "cli-1");
        assert!(result.error_text.unwrap().contains("exit status: 1"));
    }

    #[tokio::test]
    async fn test_stderr_tail_keeps_last_lines() {
        let input: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = collect_tail(input.as_bytes()).await;
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }
}
