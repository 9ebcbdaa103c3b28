//! Submission dispatcher (§4.5).
//!
//! Fans one submission into N jobs, one per input vector, shares a single
//! materialized source file and mount across them, and assembles ordered
//! outputs once every job has replied.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::config::ContainerConfiguration;
use crate::docker::{platform_from_env, ContainerClient, CreateContainerInput};

use super::job::{JobOutput, JobSpec};
use super::pool::WorkerPool;
use super::scratch::ScratchProvider;

/// One variant of a submission's input: optional argument text appended to
/// the shell command, and optional stdin to feed the process.
#[derive(Debug, Clone, Default)]
pub struct InputVector {
    pub args: Option<String>,
    pub stdin: Option<String>,
}

/// A request to compile-and-run `source` once per entry in `inputs`.
#[derive(Debug, Clone)]
pub struct Submission {
    pub image: String,
    pub cmd: String,
    pub source: String,
    pub source_filename: String,
    pub inputs: Vec<InputVector>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to materialize source file: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("submission has no input vectors")]
    EmptyInputs,

    #[error("worker queue closed")]
    QueueClosed,

    #[error("dispatch task failed: {0}")]
    Internal(String),
}

/// A job that either never made it past container creation (and so carries
/// its final output already) or was handed to the pool and will reply later.
enum PendingJob {
    Immediate(JobOutput),
    Queued(oneshot::Receiver<JobOutput>),
}

/// Runs a submission to completion against `pool`, returning exactly
/// `submission.inputs.len()` outputs in input order (§6.1).
///
/// `cancel` is the request scope: cancelling it aborts every in-flight job
/// for this submission. The fan-out, admission, and scratch-directory
/// cleanup run on a detached task so that dropping the returned future (an
/// aborted HTTP request, say) can never tear down the scratch directory
/// while jobs enqueued from it are still live on worker tasks — the
/// Definition invariant requires the source file to be deleted exactly once,
/// and not before the last job referencing it has reached `Reaped`. A
/// `tokio::spawn`'d task keeps running after its `JoinHandle` is dropped, so
/// only awaiting that handle below is cancellation-affected, never the work
/// itself.
pub async fn process_submission(
    pool: Arc<WorkerPool>,
    scratch: &ScratchProvider,
    config: &ContainerConfiguration,
    submission: Submission,
    cancel: CancellationToken,
) -> Result<Vec<JobOutput>, DispatchError> {
    if submission.inputs.is_empty() {
        return Err(DispatchError::EmptyInputs);
    }

    let definition_id = Uuid::new_v4().simple().to_string();
    let (_host_path, mount, release) =
        scratch.materialize(&definition_id, &submission.source_filename, &submission.source)?;

    let definition_cancel = cancel.child_token();
    let platform = platform_from_env(&config.target_arch, &config.target_os, &config.target_variant);
    let timeout = Duration::from_secs(config.timeout_seconds);
    let max_output_bytes = config.max_output_kb * 1024;
    let client = pool.client();

    let image = submission.image;
    let cmd = submission.cmd;
    let source_filename = submission.source_filename;
    let memory_mb = config.max_memory_mb;
    let cpu_shares = config.cpu_shares;
    let use_strong_isolation = config.use_strong_isolation;
    let inputs = submission.inputs;

    let handle = tokio::spawn(async move {
        let mut pending = Vec::with_capacity(inputs.len());

        for (job_id, input) in inputs.into_iter().enumerate() {
            let full_command = build_command(&cmd, &source_filename, input.args.as_deref());

            // Create the container before enqueueing (§4.5 step 2): a
            // doomed image-pull or name collision surfaces here instead of
            // occupying a queue slot and a worker for a job that can never
            // run.
            let create_input = CreateContainerInput {
                name: format!("bg_{definition_id}_{job_id}"),
                full_command,
                image: image.clone(),
                mount: mount.clone(),
                memory_mb,
                cpu_shares,
                use_strong_isolation,
                platform: platform.clone(),
            };

            let container_id = match client.create_container(create_input).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(job = job_id, "container create failed: {e}");
                    pending.push(PendingJob::Immediate(JobOutput::placeholder(format!(
                        "create failed: {e}"
                    ))));
                    continue;
                }
            };

            let spec = JobSpec {
                job_id,
                container_id,
                stdin: input.stdin,
                timeout,
                max_output_bytes,
                cancel: definition_cancel.clone(),
            };

            match pool.submit(spec).await {
                Ok(rx) => pending.push(PendingJob::Queued(rx)),
                Err(e) => {
                    warn!(job = job_id, "enqueue failed: {e}");
                    pending.push(PendingJob::Immediate(JobOutput::placeholder(e.to_string())));
                }
            }
        }

        // Wait for every job's reply. A dropped sender (worker panicked — it
        // shouldn't, §7) still yields a placeholder rather than shortening
        // the result vector (§9).
        let outputs = join_all(pending.into_iter().map(|p| async move {
            match p {
                PendingJob::Immediate(output) => output,
                PendingJob::Queued(rx) => rx.await.unwrap_or_else(|_| {
                    JobOutput::placeholder("worker dropped without replying")
                }),
            }
        }))
        .await;

        drop(release);
        outputs
    });

    handle.await.map_err(|e| DispatchError::Internal(e.to_string()))
}

/// `"<cmd> <basename(sourceFilename)>[ <args>]"`, run as `/bin/sh -c "<this>"`.
fn build_command(cmd: &str, source_filename: &str, args: Option<&str>) -> String {
    let mut command = format!("{cmd} {source_filename}");
    if let Some(args) = args {
        if !args.is_empty() {
            command.push(' ');
            command.push_str(args);
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::fake::FakeContainerClient;
    use std::collections::HashMap;

    fn container_config() -> ContainerConfiguration {
        ContainerConfiguration {
            timeout_seconds: 5,
            max_memory_mb: 256,
            cpu_shares: 512,
            max_output_kb: 64,
            use_strong_isolation: false,
            target_arch: "amd64".into(),
            target_os: "linux".into(),
            target_variant: String::new(),
        }
    }

    #[test]
    fn command_includes_basename_and_args() {
        assert_eq!(build_command("python3", "main.py", None), "python3 main.py");
        assert_eq!(
            build_command("python3", "main.py", Some("--flag")),
            "python3 main.py --flag"
        );
    }

    #[tokio::test]
    async fn happy_path_one_input() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchProvider::new(tmp.path().to_path_buf()).unwrap();

        let client: Arc<dyn ContainerClient> = Arc::new(FakeContainerClient::new(HashMap::new()));
        let pool = Arc::new(WorkerPool::start(2, 4, client));

        let submission = Submission {
            image: "python:3".into(),
            cmd: "python3".into(),
            source: "print(input())\n".into(),
            source_filename: "main.py".into(),
            inputs: vec![InputVector { args: None, stdin: Some("hi".into()) }],
        };

        let outputs = process_submission(pool, &scratch, &container_config(), submission, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outputs.len(), 1);
    }

    #[tokio::test]
    async fn per_job_isolation_preserves_order_and_length() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchProvider::new(tmp.path().to_path_buf()).unwrap();
        let client: Arc<dyn ContainerClient> = Arc::new(FakeContainerClient::new(HashMap::new()));
        let pool = Arc::new(WorkerPool::start(2, 4, client));

        let submission = Submission {
            image: "python:3".into(),
            cmd: "python3".into(),
            source: "print('ok')\n".into(),
            source_filename: "main.py".into(),
            inputs: vec![
                InputVector { args: None, stdin: None },
                InputVector { args: None, stdin: None },
            ],
        };

        let outputs = process_submission(pool, &scratch, &container_config(), submission, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outputs.len(), 2);
    }

    #[tokio::test]
    async fn empty_inputs_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = ScratchProvider::new(tmp.path().to_path_buf()).unwrap();
        let client: Arc<dyn ContainerClient> = Arc::new(FakeContainerClient::new(HashMap::new()));
        let pool = Arc::new(WorkerPool::start(1, 4, client));

        let submission = Submission {
            image: "python:3".into(),
            cmd: "python3".into(),
            source: "pass\n".into(),
            source_filename: "main.py".into(),
            inputs: vec![],
        };

        let err = process_submission(pool, &scratch, &container_config(), submission, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::EmptyInputs));
    }

    #[tokio::test]
    async fn release_survives_caller_drop() {
        // A dropped caller future must not race the scratch cleanup against
        // jobs still in flight: the scratch directory must still exist right
        // after the caller is dropped (simulating a disconnected HTTP
        // request), and must eventually be removed once the detached
        // dispatch task finishes.
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();

        // Every container (whatever random name the dispatcher picks) takes
        // 150ms to finish, giving the test a window to observe the scratch
        // directory before cleanup happens.
        let client: Arc<dyn ContainerClient> = Arc::new(FakeContainerClient::with_default(
            HashMap::new(),
            crate::docker::fake::Script { exit_after: Duration::from_millis(150), ..Default::default() },
        ));
        let pool = Arc::new(WorkerPool::start(1, 4, client));

        let caller_root = root.clone();
        let outer = tokio::spawn(async move {
            let scratch = ScratchProvider::new(caller_root).unwrap();
            let submission = Submission {
                image: "python:3".into(),
                cmd: "python3".into(),
                source: "print('ok')\n".into(),
                source_filename: "main.py".into(),
                inputs: vec![InputVector { args: None, stdin: None }],
            };
            let _ = process_submission(pool, &scratch, &container_config(), submission, CancellationToken::new())
                .await;
        });

        // Let the outer task materialize the source file and hand the job
        // off to the detached task before simulating the caller vanishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        outer.abort();

        let entries = || std::fs::read_dir(&root).unwrap().count();
        assert_eq!(entries(), 1, "scratch dir must survive the caller being dropped mid-flight");

        tokio::time::timeout(Duration::from_secs(2), async {
            while entries() != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scratch dir should be cleaned up once the detached task completes");
    }
}
