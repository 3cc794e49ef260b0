//! Passive HTTP view of the supervisor.
//!
//! Handlers only hold a [`StatusReader`], so nothing served here can start,
//! stop or signal the worker.

use crate::error::{Result, TetherError};
use crate::process::handle::ExitInfo;
use crate::process::monitor::{ProcessMonitor, ResourceUsage};
use crate::process::supervisor::StatusReader;
use crate::process::types::SupervisorState;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

/// Served on `GET /` when the static directory has no `index.html`
pub const FALLBACK_MESSAGE: &str = "tether is running. See /health for worker status.\n";

#[derive(Clone)]
struct HealthState {
    reader: StatusReader,
    monitor: Arc<Mutex<ProcessMonitor>>,
    static_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub alive: bool,
    pub restarts: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub state: SupervisorState,
    pub alive: bool,
    pub pid: Option<u32>,
    pub restarts: u64,
    pub generation: u64,
    pub started_at: Option<String>,
    pub uptime_secs: Option<u64>,
    pub current_delay_ms: u64,
    pub pending_delay_ms: Option<u64>,
    pub last_exit: Option<ExitInfo>,
    pub last_spawn_error: Option<String>,
    pub last_restart_at: Option<String>,
    pub memory_bytes: Option<u64>,
    pub cpu_percent: Option<f32>,
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

/// Build the router for `/`, `/health`, `/status` and static assets
pub fn build_router(reader: StatusReader, static_dir: PathBuf) -> Router {
    let state = HealthState {
        reader,
        monitor: Arc::new(Mutex::new(ProcessMonitor::new())),
        static_dir: static_dir.clone(),
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/status", get(status))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

/// Bind `addr` and serve `router` until `shutdown` resolves
///
/// A bind failure is returned as [`TetherError::ListenError`]; callers log it
/// and keep supervising.
pub async fn serve<F>(addr: &str, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TetherError::ListenError {
            addr: addr.to_string(),
            source,
        })?;

    tracing::info!(addr = %addr, "Health endpoint listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Health endpoint stopped");
    Ok(())
}

async fn index(State(state): State<HealthState>) -> Response {
    let index = state.static_dir.join("index.html");

    match tokio::fs::read(&index).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], bytes).into_response(),
        Err(_) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            FALLBACK_MESSAGE,
        )
            .into_response(),
    }
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    let status = state.reader.snapshot();

    Json(HealthResponse {
        alive: status.is_alive(),
        restarts: status.restarts,
    })
}

async fn status(State(state): State<HealthState>) -> Json<StatusResponse> {
    let status = state.reader.snapshot();

    let resources = match status.pid {
        Some(pid) if status.is_alive() => sample_resources(&state.monitor, pid).await,
        _ => None,
    };

    Json(StatusResponse {
        state: status.state,
        alive: status.is_alive(),
        pid: status.pid,
        restarts: status.restarts,
        generation: status.generation,
        started_at: status.started_at.map(rfc3339),
        uptime_secs: status.uptime().map(|uptime| uptime.as_secs()),
        current_delay_ms: status.next_delay.as_millis() as u64,
        pending_delay_ms: status.pending_delay.map(|delay| delay.as_millis() as u64),
        last_exit: status.last_exit.clone(),
        last_spawn_error: status.last_spawn_error.clone(),
        last_restart_at: status.last_restart.map(rfc3339),
        memory_bytes: resources.map(|usage| usage.memory_bytes),
        cpu_percent: resources.map(|usage| usage.cpu_percent),
    })
}

/// Refreshing from `/proc` blocks, so it runs off the async workers
async fn sample_resources(
    monitor: &Arc<Mutex<ProcessMonitor>>,
    pid: u32,
) -> Option<ResourceUsage> {
    let monitor = Arc::clone(monitor);

    tokio::task::spawn_blocking(move || monitor.lock().ok()?.sample(pid))
        .await
        .ok()
        .flatten()
}
