//! Narrow container-runtime client used by the job runner.
//!
//! This is the only part of the service that talks to the container daemon.
//! It is expressed as a trait (`ContainerClient`) so the job runner and
//! dispatcher can be exercised in tests against [`fake::FakeContainerClient`]
//! without a real Docker daemon.

mod client;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use client::BollardContainerClient;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

/// A bind mount projecting a host path read-only into the container.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

/// Platform selectors forwarded to image resolution.
#[derive(Debug, Clone)]
pub struct Platform {
    pub arch: String,
    pub os: String,
    pub variant: Option<String>,
}

/// Everything needed to create one job's container.
#[derive(Debug, Clone)]
pub struct CreateContainerInput {
    /// Container name, `bg_<defID>_<jobID>`.
    pub name: String,
    /// Full shell command run as `/bin/sh -c "<full_command>"`.
    pub full_command: String,
    pub image: String,
    pub mount: MountSpec,
    pub memory_mb: i64,
    pub cpu_shares: i64,
    pub use_strong_isolation: bool,
    pub platform: Platform,
}

/// One demultiplexed frame from the container's combined log stream.
#[derive(Debug, Clone)]
pub enum LogFrame {
    StdOut(Bytes),
    StdErr(Bytes),
}

pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogFrame, ContainerClientError>> + Send>>;

#[derive(Debug, Error)]
pub enum ContainerClientError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container name already in use: {0}")]
    ContainerExists(String),

    #[error("failed to pull image {image}: {source}")]
    ImagePull {
        image: String,
        source: bollard::errors::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow capability over the container runtime (§4.1 of the design).
///
/// Implementations must treat "no such container" as success in
/// [`ContainerClient::kill_container`] — the container has already been
/// auto-removed by the runtime, which is the outcome the caller wanted.
#[async_trait]
pub trait ContainerClient: Send + Sync {
    /// Create a container. Networking disabled, stdin open and attachable,
    /// auto-remove on exit, not privileged, working directory `/bg`.
    async fn create_container(
        &self,
        input: CreateContainerInput,
    ) -> Result<String, ContainerClientError>;

    /// Start the container and return its demultiplexed, follow-mode log stream.
    async fn start_and_attach_logs(&self, id: &str) -> Result<LogStream, ContainerClientError>;

    /// Write `text` to the container's stdin once, appending a trailing
    /// newline if absent, then close the attach channel.
    async fn feed_stdin(&self, id: &str, text: &str) -> Result<(), ContainerClientError>;

    /// Kill the container if it is running. Returns whether it was running.
    async fn kill_container(&self, id: &str) -> Result<bool, ContainerClientError>;
}

/// A drain failure is a graceful end-of-stream signal rather than a fatal
/// error when it comes from the connection being torn down underneath us —
/// the expected consequence of the log sink's ceiling action or the
/// reaper's kill. Typed replacement for matching on the underlying error
/// string ("use of closed network connection", "read on closed response
/// body").
pub fn is_benign_stream_close(err: &ContainerClientError) -> bool {
    matches!(
        err,
        ContainerClientError::Io(io_err) if matches!(
            io_err.kind(),
            std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::UnexpectedEof
        )
    )
}

/// Platform selectors from the environment, falling back to the given config
/// defaults. `TARGET_VARIANT` has no default — empty is valid (§6.4).
pub fn platform_from_env(default_arch: &str, default_os: &str, default_variant: &str) -> Platform {
    Platform {
        arch: std::env::var("TARGET_ARCH").unwrap_or_else(|_| default_arch.to_string()),
        os: std::env::var("TARGET_OS").unwrap_or_else(|_| default_os.to_string()),
        variant: std::env::var("TARGET_VARIANT")
            .ok()
            .or_else(|| {
                if default_variant.is_empty() {
                    None
                } else {
                    Some(default_variant.to_string())
                }
            })
            .filter(|v| !v.is_empty()),
    }
}
