//! In-memory [`ContainerClient`] for exercising the dispatcher and job
//! runner without a real container daemon (§10.6).
//!
//! Each container is driven by a small [`Script`] fixed at create time:
//! what bytes to emit on each stream, whether the program exits on its own
//! or hangs until killed, and what stdin (if any) it expects to be fed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use futures_util::StreamExt;

use super::{ContainerClient, ContainerClientError, CreateContainerInput, LogFrame, LogStream};

/// Scripted behavior for one fake container.
#[derive(Clone)]
pub struct Script {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// If `Some`, the container "hangs" until killed instead of exiting
    /// after emitting its scripted output.
    pub hangs: bool,
    /// Delay before the natural-exit variant closes its stream, to give
    /// tests a window to observe in-flight state.
    pub exit_after: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            hangs: false,
            exit_after: Duration::from_millis(0),
        }
    }
}

struct ContainerState {
    script: Script,
    running: bool,
    fed_stdin: Option<String>,
}

/// Fake container client keyed by the container name chosen at create time.
pub struct FakeContainerClient {
    scripts: HashMap<String, Script>,
    default_script: Script,
    containers: Arc<Mutex<HashMap<String, ContainerState>>>,
}

impl FakeContainerClient {
    /// Build a fake client where container names matching `name` run `script`.
    /// Any container name not present in `scripts` gets an empty, immediately
    /// exiting script.
    pub fn new(scripts: HashMap<String, Script>) -> Self {
        Self {
            scripts,
            default_script: Script::default(),
            containers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Like [`Self::new`], but names absent from `scripts` run
    /// `default_script` instead of an empty, immediately exiting one. Useful
    /// when the caller under test (e.g. the dispatcher) picks container
    /// names the test can't predict ahead of time.
    pub fn with_default(scripts: HashMap<String, Script>, default_script: Script) -> Self {
        Self {
            scripts,
            default_script,
            containers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// What stdin (if any) was fed to the named container.
    pub fn fed_stdin(&self, name: &str) -> Option<String> {
        self.containers.lock().unwrap().get(name).and_then(|c| c.fed_stdin.clone())
    }

    fn script_for(&self, name: &str) -> Script {
        self.scripts.get(name).cloned().unwrap_or_else(|| self.default_script.clone())
    }
}

#[async_trait]
impl ContainerClient for FakeContainerClient {
    async fn create_container(
        &self,
        input: CreateContainerInput,
    ) -> Result<String, ContainerClientError> {
        let script = self.script_for(&input.name);
        self.containers.lock().unwrap().insert(
            input.name.clone(),
            ContainerState {
                script,
                running: false,
                fed_stdin: None,
            },
        );
        Ok(input.name)
    }

    async fn start_and_attach_logs(&self, id: &str) -> Result<LogStream, ContainerClientError> {
        let script = {
            let mut containers = self.containers.lock().unwrap();
            let state = containers
                .get_mut(id)
                .expect("start called before create in fake client");
            state.running = true;
            state.script.clone()
        };

        let frames: Vec<Result<LogFrame, ContainerClientError>> = vec![
            Ok(LogFrame::StdOut(Bytes::from(script.stdout))),
            Ok(LogFrame::StdErr(Bytes::from(script.stderr))),
        ]
        .into_iter()
        .filter(|f| !matches!(f, Ok(LogFrame::StdOut(b)) if b.is_empty()))
        .collect();

        let base = stream::iter(frames);

        if script.hangs {
            // Never completes on its own; only `kill_container` ends it by
            // flipping `running` to false, which the tail stage observes.
            let containers = self.containers.clone();
            let id = id.to_string();
            let tail = stream::unfold((), move |_| {
                let containers = containers.clone();
                let id = id.clone();
                async move {
                    loop {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        if !containers.lock().unwrap().get(&id).map(|c| c.running).unwrap_or(false) {
                            return None;
                        }
                    }
                }
            });
            let combined = base.chain(tail);
            let pinned: LogStream = Box::pin(combined);
            Ok(pinned)
        } else {
            if !script.exit_after.is_zero() {
                tokio::time::sleep(script.exit_after).await;
            }
            let pinned: LogStream = Box::pin(base);
            Ok(pinned)
        }
    }

    async fn feed_stdin(&self, id: &str, text: &str) -> Result<(), ContainerClientError> {
        let mut payload = text.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        if let Some(state) = self.containers.lock().unwrap().get_mut(id) {
            state.fed_stdin = Some(payload);
        }
        Ok(())
    }

    async fn kill_container(&self, id: &str) -> Result<bool, ContainerClientError> {
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(id) {
            Some(state) if state.running => {
                state.running = false;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }
}
