//! Worker pool (§4.4).
//!
//! A fixed population of long-lived workers pulling from one shared bounded
//! queue. The queue is the sole admission point: offering to a full queue
//! blocks the offerer, which is the backpressure the spec calls for instead
//! of load-shedding. Grounded on the teacher's `server::manager::Manager`
//! for the "fixed pool of long-lived tasks" shape, generalized from a
//! `DashMap` of servers to an `mpsc` queue of jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::docker::ContainerClient;

use super::job::{run_job, JobOutput, JobSpec};

/// One unit of queued work: a job to run plus where to send its output.
pub struct QueuedJob {
    pub spec: JobSpec,
    pub reply: tokio::sync::oneshot::Sender<JobOutput>,
}

/// Per-worker counters. Advanced non-atomically on purpose (§4.4): they are
/// for observability only and need not be globally accurate, so each worker
/// owns its own pair rather than the pool sharing one.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub compiles: u64,
    pub errors: u64,
}

/// Aggregate, best-effort counters exposed for `/healthz`.
#[derive(Debug, Default)]
pub struct PoolStats {
    compiles: AtomicU64,
    errors: AtomicU64,
}

impl PoolStats {
    pub fn snapshot(&self) -> (u64, u64) {
        (self.compiles.load(Ordering::Relaxed), self.errors.load(Ordering::Relaxed))
    }
}

/// Fixed-size pool of worker tasks consuming from a bounded queue.
pub struct WorkerPool {
    queue: mpsc::Sender<QueuedJob>,
    stats: Arc<PoolStats>,
    /// Shared with the dispatcher, which creates each job's container
    /// before enqueueing it (§4.5 step 2) rather than leaving creation to
    /// the worker that eventually dequeues it.
    client: Arc<dyn ContainerClient>,
}

impl WorkerPool {
    /// Spawn `worker_count` long-lived workers sharing a queue of depth
    /// `queue_depth`. Workers never exit in the minimal core.
    pub fn start(worker_count: usize, queue_depth: usize, client: Arc<dyn ContainerClient>) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(PoolStats::default());

        for worker_id in 0..worker_count.max(1) {
            let rx = rx.clone();
            let worker_client = client.clone();
            let stats = stats.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, rx, worker_client, stats).await;
            });
        }

        info!(worker_count, queue_depth, "worker pool started");
        Self { queue: tx, stats, client }
    }

    /// Enqueue a job, blocking if the queue is full (§4.4 admission control).
    pub async fn submit(&self, spec: JobSpec) -> Result<tokio::sync::oneshot::Receiver<JobOutput>, SubmitError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.queue
            .send(QueuedJob { spec, reply: reply_tx })
            .await
            .map_err(|_| SubmitError::QueueClosed)?;
        Ok(reply_rx)
    }

    /// The container client workers run jobs against. The dispatcher uses
    /// this to create a job's container ahead of enqueueing it, so a
    /// doomed creation never occupies a queue slot or worker.
    pub fn client(&self) -> Arc<dyn ContainerClient> {
        self.client.clone()
    }

    pub fn stats(&self) -> (u64, u64) {
        self.stats.snapshot()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("worker queue closed")]
    QueueClosed,
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>>,
    client: Arc<dyn ContainerClient>,
    stats: Arc<PoolStats>,
) {
    let mut local = WorkerStats::default();

    loop {
        let queued = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let Some(queued) = queued else {
            debug!(worker_id, "queue closed, worker exiting");
            return;
        };

        let job_id = queued.spec.job_id;
        let output = run_job(client.clone(), queued.spec).await;

        if output.error.is_some() {
            local.errors += 1;
            stats.errors.fetch_add(1, Ordering::Relaxed);
        } else {
            local.compiles += 1;
            stats.compiles.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            worker_id,
            job_id,
            compiles = local.compiles,
            errors = local.errors,
            "job complete"
        );

        let _ = queued.reply.send(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::fake::{FakeContainerClient, Script};
    use crate::docker::{CreateContainerInput, MountSpec, Platform};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Creates the container via `client` (as the dispatcher now does ahead
    /// of enqueueing) and returns a `JobSpec` referencing it.
    async fn spec(client: &Arc<dyn ContainerClient>, name: &str, job_id: usize) -> JobSpec {
        let container_id = client
            .create_container(CreateContainerInput {
                name: name.to_string(),
                full_command: "python3 main.py".into(),
                image: "python:3".into(),
                mount: MountSpec { host_path: "/tmp/x".into(), container_path: "/bg/main.py".into(), read_only: true },
                memory_mb: 256,
                cpu_shares: 512,
                use_strong_isolation: false,
                platform: Platform { arch: "amd64".into(), os: "linux".into(), variant: None },
            })
            .await
            .unwrap();

        JobSpec {
            job_id,
            container_id,
            stdin: None,
            timeout: Duration::from_secs(5),
            max_output_bytes: 1024,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn submits_and_collects_one_job() {
        let mut scripts = HashMap::new();
        scripts.insert("bg_def_0".to_string(), Script { stdout: b"ok\n".to_vec(), ..Default::default() });
        let client: Arc<dyn ContainerClient> = Arc::new(FakeContainerClient::new(scripts));

        let job = spec(&client, "bg_def_0", 0).await;
        let pool = WorkerPool::start(1, 4, client);
        let rx = pool.submit(job).await.unwrap();
        let output = rx.await.unwrap();

        assert_eq!(output.stdout, "ok\n");
        assert_eq!(pool.stats().0, 1);
    }

    #[tokio::test]
    async fn backpressure_blocks_when_queue_and_workers_are_full() {
        let mut scripts = HashMap::new();
        scripts.insert("bg_def_0".to_string(), Script { hangs: true, ..Default::default() });
        scripts.insert("bg_def_1".to_string(), Script { hangs: true, ..Default::default() });
        let client: Arc<dyn ContainerClient> = Arc::new(FakeContainerClient::new(scripts));

        let mut first = spec(&client, "bg_def_0", 0).await;
        first.timeout = Duration::from_millis(150);
        let mut second = spec(&client, "bg_def_1", 1).await;
        second.timeout = Duration::from_millis(50);
        let third_job = spec(&client, "bg_def_2", 2).await;

        // One worker, queue depth one: the second submit fills the queue,
        // the third must block until a worker frees up.
        let pool = WorkerPool::start(1, 1, client);

        let _rx1 = pool.submit(first).await.unwrap();
        let rx2 = pool.submit(second).await.unwrap();

        let third = tokio::time::timeout(Duration::from_millis(100), pool.submit(third_job)).await;
        assert!(third.is_err(), "third submit should still be blocked on the full queue");

        // Let job 1's timeout fire, freeing the worker for job 2.
        let _ = rx2.await;
    }
}
