//! The two HTTP handlers this service exposes (§6.1).

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServiceError};
use crate::execution::{process_submission, InputVector, JobOutput, Submission};

use super::AppState;

/// Wire shape of a submission (§3). Field names mirror the data model.
#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    pub image: String,
    pub cmd: String,
    pub source: String,
    #[serde(rename = "sourceFilename")]
    pub source_filename: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub inputs: Vec<CompileInput>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CompileInput {
    #[serde(default)]
    pub args: Option<String>,
    #[serde(default)]
    pub stdin: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompileResponse {
    pub outputs: Vec<JobOutput>,
}

/// `POST /compile`. Request-level failures (bad submission, dispatcher
/// failure) map to a 4xx/5xx via [`ServiceError`]; per-job failures are
/// folded into the corresponding `JobOutput` instead (§6.1).
pub async fn compile(
    State(state): State<AppState>,
    Json(request): Json<CompileRequest>,
) -> Result<Json<CompileResponse>> {
    if request.source_filename.trim().is_empty() {
        return Err(ServiceError::InvalidSubmission("sourceFilename must not be empty".into()));
    }

    // A submission with no explicit input vectors still runs once, using
    // the top-level stdin (§3: `inputs` length ≥ 1).
    let inputs = if request.inputs.is_empty() {
        vec![InputVector { args: None, stdin: request.stdin.clone() }]
    } else {
        request
            .inputs
            .into_iter()
            .map(|i| InputVector {
                args: i.args,
                stdin: i.stdin.or_else(|| request.stdin.clone()),
            })
            .collect()
    };

    let submission = Submission {
        image: request.image,
        cmd: request.cmd,
        source: request.source,
        source_filename: request.source_filename,
        inputs,
    };

    let outputs = process_submission(
        state.pool.clone(),
        &state.scratch,
        &state.container,
        submission,
        CancellationToken::new(),
    )
    .await
    .map_err(|e| match e {
        crate::execution::DispatchError::Scratch(io) => ServiceError::Scratch(io),
        crate::execution::DispatchError::EmptyInputs => {
            ServiceError::InvalidSubmission("inputs must not be empty".into())
        }
        crate::execution::DispatchError::QueueClosed => ServiceError::QueueClosed,
        crate::execution::DispatchError::Internal(msg) => ServiceError::Internal(msg),
    })?;

    Ok(Json(CompileResponse { outputs }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub compiles: u64,
    pub errors: u64,
}

/// `GET /healthz`. Liveness plus best-effort pool counters (§4.4: advisory
/// only, not globally accurate).
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let (compiles, errors) = state.pool.stats();
    Json(HealthResponse { status: "ok", compiles, errors })
}
