use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    extract::{Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::process::Command;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::lock::{JobLock, LockError};

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

// ======================================================
// ERRORS
// ======================================================

#[derive(Debug)]
pub enum DispatchError {
    UnknownKey(String),
    Busy(String),
    Timeout(u64),
    JobFailed(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::UnknownKey(_) => StatusCode::BAD_REQUEST,
            DispatchError::Busy(_)       => StatusCode::CONFLICT,
            DispatchError::Timeout(_)    => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::NotFound(_)   => StatusCode::NOT_FOUND,
            DispatchError::JobFailed(_) | DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            DispatchError::UnknownKey(key) => format!("Unknown report '{}'", key),
            DispatchError::Busy(key)       => format!("Report '{}' is already being generated", key),
            DispatchError::Timeout(secs)   => format!("Report generation exceeded {} s", secs),
            DispatchError::JobFailed(why)  => format!("Report generation failed: {}", why),
            DispatchError::NotFound(name)  => format!("Report file was not produced: {}", name),
            DispatchError::Internal(e)     => format!("Internal error: {:#}", e),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (self.status(), self.message()).into_response()
    }
}

// ======================================================
// JOB RUNNER
// ======================================================

/// Runs one report job and returns what it printed on stdout.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, config: &Path, timeout: Duration) -> Result<String, DispatchError>;
}

/// Runs `<this binary> generate --config <file>` as a child process, killed
/// when the time budget runs out.
pub struct ProcessRunner {
    exe: PathBuf,
}

impl ProcessRunner {
    pub fn current() -> anyhow::Result<Self> {
        let exe = std::env::current_exe().context("Could not locate the running executable")?;
        Ok(ProcessRunner { exe })
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    async fn run(&self, config: &Path, timeout: Duration) -> Result<String, DispatchError> {
        let child = Command::new(&self.exe)
            .arg("generate")
            .arg("--config")
            .arg(config)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DispatchError::Internal(anyhow::Error::new(e).context("spawning report job")))?;

        // dropping the child on timeout kills it
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => return Err(DispatchError::Timeout(timeout.as_secs())),
            Ok(result) => result.map_err(|e| DispatchError::Internal(e.into()))?,
        };

        if !output.status.success() {
            return Err(DispatchError::JobFailed(output.status.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ======================================================
// HTTP
// ======================================================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub runner: Arc<dyn JobRunner>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/grafana-data-report/{key}", get(report))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let bind = config.bind.clone();
    let state = AppState {
        config: Arc::new(config),
        runner: Arc::new(ProcessRunner::current()?),
    };

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Could not bind {}", bind))?;
    info!(address = %bind, jobs = state.config.jobs.len(), "report dispatcher listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn report(State(state): State<AppState>, UrlPath(key): UrlPath<String>) -> Response {
    let span = tracing::info_span!("job", %key, run = %Uuid::new_v4());
    match dispatch(&state, &key).instrument(span).await {
        Ok(response) => response,
        Err(e) => {
            match e.status() {
                StatusCode::INTERNAL_SERVER_ERROR | StatusCode::GATEWAY_TIMEOUT => {
                    error!(%key, status = %e.status(), "{}", e.message())
                }
                _ => warn!(%key, status = %e.status(), "{}", e.message()),
            }
            e.into_response()
        }
    }
}

async fn dispatch(state: &AppState, key: &str) -> Result<Response, DispatchError> {
    let config_path = state
        .config
        .job(key)
        .ok_or_else(|| DispatchError::UnknownKey(key.to_string()))?
        .to_path_buf();

    let _lock = JobLock::acquire(&state.config.lock_dir, key).map_err(|e| match e {
        LockError::Busy { .. } => DispatchError::Busy(key.to_string()),
        other => DispatchError::Internal(other.into()),
    })?;

    info!(config = %config_path.display(), "running report job");
    let timeout = Duration::from_secs(state.config.timeout_secs);
    let stdout = state.runner.run(&config_path, timeout).await?;

    let name = artifact_name(&stdout).ok_or_else(|| DispatchError::NotFound(String::new()))?;
    let root = state.config.reports_dir.clone();
    let lookup = name.clone();
    let path = tokio::task::spawn_blocking(move || find_file(&root, &lookup))
        .await
        .map_err(|e| DispatchError::Internal(e.into()))?
        .ok_or_else(|| DispatchError::NotFound(name.clone()))?;

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| DispatchError::Internal(anyhow::Error::new(e).context(path.display().to_string())))?;

    info!(file = %path.display(), bytes = bytes.len(), "sending report");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, XLSX_MIME.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", name)),
        ],
        bytes,
    )
        .into_response())
}

/// The file name a job printed: its last non-empty stdout line. Anything
/// that looks like a path is refused.
pub fn artifact_name(stdout: &str) -> Option<String> {
    let name = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// First file called `name` anywhere under `root`.
pub fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_dir() => pending.push(path),
                Ok(t) if t.is_file() && entry.file_name() == name => return Some(path),
                _ => {}
            }
        }
    }
    None
}

// ======================================================
// TESTS
// ======================================================
