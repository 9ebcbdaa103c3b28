//! Job runner (§4.3).
//!
//! Drives one already-created container through start, feed stdin, drain
//! logs into bounded sinks, reap, assemble. Container creation happens in
//! the dispatcher, ahead of enqueueing (§4.5 step 2), so a doomed creation
//! never occupies a queue slot or a worker. Grounded on
//! `environment/docker/power.rs`'s start/attach/kill sequencing, generalized
//! from a long-lived server process to a single one-shot run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::docker::{is_benign_stream_close, ContainerClient, ContainerClientError, LogFrame, LogStream};

use super::sink::BoundedLogSink;

/// Captured result of one container run (§3, external `JobOutput`).
#[derive(Debug, Clone, Serialize)]
pub struct JobOutput {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u128,
    #[serde(rename = "timedOut")]
    pub timed_out: bool,
    /// Set only when the job never reached "assemble output" — a job that
    /// ran to completion, even a killed one, carries `None` here (§9: always
    /// publish a placeholder rather than shorten the result vector).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutput {
    pub(crate) fn placeholder(error: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            timed_out: false,
            error: Some(error.into()),
        }
    }
}

/// Everything one job needs, independent of the definition that spawned it.
///
/// Per §9's "replacing per-object back-pointers": this carries no reference
/// to the definition itself, only the pieces it owns a copy or handle of.
/// The container named by `container_id` already exists — the dispatcher
/// created it before this spec was enqueued.
pub struct JobSpec {
    pub job_id: usize,
    pub container_id: String,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    /// Child of the definition's scope, itself a child of the request scope.
    pub cancel: CancellationToken,
}

/// Run one already-created job to completion. Never panics; every failure
/// path returns a `JobOutput` (placeholder or otherwise) rather than
/// propagating an error.
pub async fn run_job(client: Arc<dyn ContainerClient>, spec: JobSpec) -> JobOutput {
    // The deadline is anchored here, before `StartContainer`, matching the
    // original's timing rather than starting the clock after stdin is fed.
    let deadline_token = spec.cancel.child_token();
    let (done_tx, done_rx) = oneshot::channel::<bool>();
    spawn_reaper(
        client.clone(),
        spec.container_id.clone(),
        deadline_token.clone(),
        spec.timeout,
        done_tx,
    );

    let log_stream = match client.start_and_attach_logs(&spec.container_id).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(job = spec.job_id, container = %spec.container_id, "container start failed: {e}");
            deadline_token.cancel();
            let _ = done_rx.await;
            return JobOutput::placeholder(format!("start failed: {e}"));
        }
    };
    let start = Instant::now();

    if let Some(stdin) = spec.stdin.as_deref() {
        if let Err(e) = client.feed_stdin(&spec.container_id, stdin).await {
            warn!(job = spec.job_id, container = %spec.container_id, "stdin feed failed: {e}");
        }
    }

    let (stdout, stderr) = drain_logs(log_stream, spec.max_output_bytes, spec.job_id).await;

    // Join reaper: cancel (idempotent if the deadline already fired) and
    // wait for confirmation the container is dead before publishing.
    deadline_token.cancel();
    let timed_out = done_rx.await.unwrap_or(false);

    JobOutput {
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
        duration_ms: start.elapsed().as_millis(),
        timed_out,
        error: None,
    }
}

/// Waits for the scope to be cancelled — by deadline or by the drain loop
/// finishing — then kills the container with a fresh, unbounded scope.
fn spawn_reaper(
    client: Arc<dyn ContainerClient>,
    container_id: String,
    token: CancellationToken,
    timeout: Duration,
    done_tx: oneshot::Sender<bool>,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
            }
        }

        let was_running = match client.kill_container(&container_id).await {
            Ok(running) => running,
            Err(e) => {
                warn!(container = %container_id, "kill failed: {e}");
                false
            }
        };

        let _ = done_tx.send(was_running);
    });
}

/// Demultiplex the log stream into two bounded sinks. Returns once the
/// stream ends, either sink saturates, or a non-benign I/O error occurs.
async fn drain_logs(
    mut stream: LogStream,
    ceiling: usize,
    job_id: usize,
) -> (BoundedLogSink, BoundedLogSink) {
    let mut stdout = BoundedLogSink::new(ceiling);
    let mut stderr = BoundedLogSink::new(ceiling);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(LogFrame::StdOut(bytes)) => {
                if stdout.write(&bytes) {
                    break;
                }
            }
            Ok(LogFrame::StdErr(bytes)) => {
                if stderr.write(&bytes) {
                    break;
                }
            }
            Err(e) if is_close(&e) => break,
            Err(e) => {
                warn!(job = job_id, "log drain error: {e}");
                break;
            }
        }
    }

    debug!(job = job_id, stdout = stdout.len(), stderr = stderr.len(), "drain complete");
    (stdout, stderr)
}

fn is_close(err: &ContainerClientError) -> bool {
    is_benign_stream_close(err)
}
