//! # Parent-side message channel for one child.
//!
//! Wires a spawned child's stdio into the kernel:
//!
//! ```text
//! child stdout ──► reader pump ──► Command::ChildRequest ──► kernel mailbox
//! kernel reply ──► writer queue ──► writer task ──► child stdin
//! ```
//!
//! Framing is one JSON value per line. The writer task owns the stdin
//! half; when every sender clone is dropped (handle removed, waiter done)
//! the queue closes, the task exits, and the pipe closes with it. That is
//! the broker's liveness gate: nothing can be written to a child whose
//! handle has left the running state.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::proto::ChildRequest;

use super::supervisor::Command;

/// Queue depth for outbound lines to one child.
const WRITER_QUEUE: usize = 64;

/// Live channel halves for one child.
pub(crate) struct ChildChannel {
    /// Sender of pre-encoded, newline-terminated lines.
    pub writer: mpsc::Sender<String>,
}

/// Takes the child's stdio pipes and spawns the pump tasks.
///
/// Inbound lines are decoded and forwarded to the kernel stamped with the
/// service name and spawn generation; undecodable lines are logged and
/// skipped. EOF ends the pump silently; exit detection belongs to the
/// waiter task.
pub(crate) fn attach(
    child: &mut Child,
    service: &str,
    generation: u64,
    tx: mpsc::UnboundedSender<Command>,
) -> Result<ChildChannel, ServiceError> {
    let stdin = child.stdin.take().ok_or_else(|| ServiceError::ChannelUnavailable {
        service: service.to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| ServiceError::ChannelUnavailable {
        service: service.to_string(),
    })?;

    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(WRITER_QUEUE);
    tokio::spawn(async move {
        let mut stdin = stdin;
        while let Some(line) = writer_rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.flush().await.is_err() {
                break;
            }
        }
    });

    let name = service.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    let request = serde_json::from_str(trimmed)
                        .map_err(|e| ServiceError::Protocol { reason: e.to_string() })
                        .and_then(ChildRequest::from_value);
                    match request {
                        Ok(request) => {
                            let _ = tx.send(Command::ChildRequest {
                                service: name.clone(),
                                generation,
                                request,
                            });
                        }
                        Err(e) => {
                            warn!(service = %name, error = %e, "discarding malformed message");
                        }
                    }
                }
                Ok(None) => {
                    debug!(service = %name, "child channel reached eof");
                    break;
                }
                Err(e) => {
                    warn!(service = %name, error = %e, "child channel read failed");
                    break;
                }
            }
        }
    });

    Ok(ChildChannel { writer: writer_tx })
}
