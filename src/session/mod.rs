use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::error::{ContextError, ErrorCode};
use crate::models::notification::Notification;
use crate::models::request::{Command, ControlRequest};
use crate::orchestrator::Orchestrator;

/// Maximum line size for session input: 1 MB.
const MAX_LINE_SIZE: usize = 1024 * 1024;

/// `{"error": {"code", "message"}}` for any failure, typed or not.
pub fn error_json(e: &anyhow::Error) -> serde_json::Value {
    let (code, message) = match e.downcast_ref::<ContextError>() {
        Some(ce) => (ce.code.to_string(), ce.message.clone()),
        None => (ErrorCode::IoError.to_string(), e.to_string()),
    };
    serde_json::json!({ "error": { "code": code, "message": message } })
}

/// Run an NDJSON control session over stdin/stdout until `stop` or EOF.
pub async fn run_session(
    orchestrator: &mut Orchestrator,
    notifications: UnboundedReceiver<Notification>,
) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    run_session_io(orchestrator, notifications, stdin, stdout).await
}

/// Interleave notifications with responses to control requests.
///
/// Each request's response is written after every notification emitted while
/// it was handled.
pub async fn run_session_io<R, W>(
    orchestrator: &mut Orchestrator,
    mut notifications: UnboundedReceiver<Notification>,
    input: R,
    mut out: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        tokio::select! {
            Some(notification) = notifications.recv() => {
                write_line(&mut out, &notification).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let (response, stop) = if trimmed.len() > MAX_LINE_SIZE {
                    let err = serde_json::json!({
                        "error": {
                            "code": "INVALID_REQUEST",
                            "message": format!(
                                "Input line exceeds maximum size ({} bytes > {} bytes)",
                                trimmed.len(),
                                MAX_LINE_SIZE
                            )
                        }
                    });
                    (err, false)
                } else {
                    match serde_json::from_str::<ControlRequest>(trimmed) {
                        Ok(req) => {
                            let stop = req.command == Command::Stop;
                            let response = handle(orchestrator, req)
                                .await
                                .unwrap_or_else(|e| error_json(&e));
                            (response, stop)
                        }
                        Err(e) => (
                            serde_json::json!({
                                "error": {
                                    "code": "INVALID_REQUEST",
                                    "message": format!("Invalid JSON request: {e}")
                                }
                            }),
                            false,
                        ),
                    }
                };

                while let Ok(notification) = notifications.try_recv() {
                    write_line(&mut out, &notification).await?;
                }
                write_line(&mut out, &response).await?;
                if stop {
                    return Ok(());
                }
            }
        }
    }

    debug!("session input closed");
    orchestrator.stop().await?;
    while let Ok(notification) = notifications.try_recv() {
        write_line(&mut out, &notification).await?;
    }
    Ok(())
}

async fn handle(orchestrator: &mut Orchestrator, req: ControlRequest) -> Result<serde_json::Value> {
    debug!(command = ?req.command, "control request");
    let value = match req.command {
        Command::Analyze => {
            if req.paths.is_empty() {
                anyhow::bail!(ContextError::new(
                    ErrorCode::InvalidRequest,
                    "analyze requires at least one path",
                ));
            }
            let result = orchestrator.force_analysis(&req.paths).await?;
            serde_json::json!({ "command": "analyze", "result": result })
        }
        Command::Approve | Command::Reject => {
            let Some(id) = req.id.as_deref() else {
                anyhow::bail!(ContextError::new(
                    ErrorCode::InvalidRequest,
                    "approve and reject require an id",
                ));
            };
            let (name, request) = if req.command == Command::Approve {
                ("approve", orchestrator.approve_update(id).await?)
            } else {
                ("reject", orchestrator.reject_update(id).await?)
            };
            let mut response = serde_json::json!({
                "command": name,
                "id": request.id,
                "status": request.status,
            });
            if let Some(outcome) = request.outcome {
                response["outcome"] = serde_json::to_value(outcome)?;
            }
            response
        }
        Command::Status => {
            serde_json::json!({ "command": "status", "status": orchestrator.status().await })
        }
        Command::Stop => {
            orchestrator.stop().await?;
            serde_json::json!({ "command": "stop", "status": orchestrator.status().await })
        }
    };
    Ok(value)
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, value: &impl Serialize) -> Result<()> {
    let mut buf = serde_json::to_vec(value)?;
    buf.push(b'\n');
    out.write_all(&buf).await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use tempfile::TempDir;

    async fn session(dir: &TempDir, input: &str) -> Vec<serde_json::Value> {
        let config = Config {
            project_path: dir.path().to_path_buf(),
            debounce_ms: 60_000,
            ..Config::default()
        };
        let (mut orch, rx) = Orchestrator::new(config);
        orch.start().await.unwrap();

        let mut out = Vec::new();
        run_session_io(&mut orch, rx, input.as_bytes(), &mut out)
            .await
            .unwrap();
        assert!(!orch.is_running());
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn status_and_stop() {
        let dir = TempDir::new().unwrap();
        let lines = session(&dir, "{\"command\":\"status\"}\n{\"command\":\"stop\"}\n").await;

        let status = lines.iter().find(|l| l["command"] == "status").unwrap();
        assert_eq!(status["status"]["running"], true);
        assert_eq!(status["status"]["pending_approval_count"], 0);

        let last = lines.last().unwrap();
        assert_eq!(last["command"], "stop");
        assert_eq!(last["status"]["running"], false);
        assert!(lines.iter().any(|l| l["event"] == "watcher-stopped"));
    }

    #[tokio::test]
    async fn bad_requests_keep_session_alive() {
        let dir = TempDir::new().unwrap();
        let input = "not json\n{\"command\":\"approve\"}\n{\"command\":\"reject\",\"id\":\"nope\"}\n{\"command\":\"status\"}\n";
        let lines = session(&dir, input).await;

        let errors: Vec<&str> = lines
            .iter()
            .filter_map(|l| l["error"]["code"].as_str())
            .collect();
        assert_eq!(errors, vec!["INVALID_REQUEST", "INVALID_REQUEST", "APPROVAL_NOT_FOUND"]);
        assert!(lines.iter().any(|l| l["command"] == "status"));
    }

    #[tokio::test]
    async fn analyze_reports_before_response() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.ts"), "export const a = 1;\n").unwrap();
        let lines = session(&dir, "{\"command\":\"analyze\",\"paths\":[\"a.ts\"]}\n").await;

        let pos = |pred: &dyn Fn(&serde_json::Value) -> bool| lines.iter().position(pred).unwrap();
        let complete = pos(&|l| l["event"] == "analysis-complete");
        let response = pos(&|l| l["command"] == "analyze");
        assert!(complete < response);
        assert_eq!(lines[response]["result"]["changes"][0]["path"], "a.ts");
    }
}
