//! Configuration structures and loading.
//!
//! A TOML file supplies defaults; CLI flags (`Cli`, in `main.rs`) override
//! individual fields before the configuration is frozen and shared across
//! the process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Process-wide configuration, read-only after startup.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Configuration {
    /// HTTP front end.
    #[serde(default)]
    pub api: ApiConfiguration,

    /// Worker pool sizing and admission control.
    #[serde(default)]
    pub pool: PoolConfiguration,

    /// Per-container resource and time ceilings.
    #[serde(default)]
    pub container: ContainerConfiguration,

    /// Host-side scratch directory management.
    #[serde(default)]
    pub scratch: ScratchConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file. A missing file falls back to defaults.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file: {}", path))?;

        let config: Configuration =
            toml::from_str(&content).with_context(|| "failed to parse configuration")?;

        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    #[serde(default = "default_api_host")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8080
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfiguration {
    /// Number of worker executors spawned once at startup.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Capacity of the worker-pool queue; enqueue blocks when full.
    #[serde(default = "default_queue_depth")]
    pub job_queue_depth: usize,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            job_queue_depth: default_queue_depth(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_depth() -> usize {
    16
}

/// Per-container resource and time ceilings.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfiguration {
    /// Per-container wall-clock ceiling (creation-to-exit).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Memory ceiling passed to the runtime, in megabytes.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: i64,

    /// Relative CPU weight passed to the runtime.
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: i64,

    /// Combined byte ceiling per stream.
    #[serde(default = "default_max_output_kb")]
    pub max_output_kb: usize,

    /// Select the hardened runtime variant instead of the default.
    #[serde(default)]
    pub use_strong_isolation: bool,

    /// Platform selector defaults. `TARGET_ARCH`/`TARGET_OS`/`TARGET_VARIANT`
    /// in the environment take precedence over these at client-construction
    /// time (see `docker::client::platform_from_env`).
    #[serde(default = "default_target_arch")]
    pub target_arch: String,

    #[serde(default = "default_target_os")]
    pub target_os: String,

    #[serde(default)]
    pub target_variant: String,
}

impl Default for ContainerConfiguration {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_memory_mb: default_max_memory_mb(),
            cpu_shares: default_cpu_shares(),
            max_output_kb: default_max_output_kb(),
            use_strong_isolation: false,
            target_arch: default_target_arch(),
            target_os: default_target_os(),
            target_variant: String::new(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_max_memory_mb() -> i64 {
    256
}

fn default_cpu_shares() -> i64 {
    512
}

fn default_max_output_kb() -> usize {
    64
}

fn default_target_arch() -> String {
    "amd64".into()
}

fn default_target_os() -> String {
    "linux".into()
}

/// Host-side scratch directory management.
#[derive(Debug, Clone, Deserialize)]
pub struct ScratchConfiguration {
    /// Root directory under which per-definition scratch subdirectories are created.
    #[serde(default = "default_scratch_directory")]
    pub directory: PathBuf,
}

impl Default for ScratchConfiguration {
    fn default() -> Self {
        Self {
            directory: default_scratch_directory(),
        }
    }
}

fn default_scratch_directory() -> PathBuf {
    PathBuf::from(".bg-runner/scratch")
}
