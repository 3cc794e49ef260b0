//! Health endpoint wired to a live supervisor.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tether::config::ProcessConfig;
use tether::health::{build_router, serve, HealthResponse};
use tether::process::{BackoffPolicy, Supervisor, SupervisorOptions, SupervisorState};
use tokio::sync::oneshot;
use tower::ServiceExt;

fn create_test_options(dir: &TempDir) -> SupervisorOptions {
    let path = dir.path().join("worker.sh");
    fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

    SupervisorOptions {
        process: ProcessConfig {
            script: path,
            ..ProcessConfig::default()
        },
        backoff: BackoffPolicy::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
            1.5,
        )
        .unwrap(),
        min_uptime: Duration::from_secs(10),
        grace_period: Duration::from_secs(2),
        stop_signal: Signal::SIGTERM,
    }
}

async fn get_health(router: axum::Router) -> HealthResponse {
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_crash_before_restart_completes() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = Supervisor::spawn(create_test_options(&temp_dir));
    let router = build_router(supervisor.reader(), PathBuf::from("/nonexistent"));

    let health = get_health(router.clone()).await;
    assert!(!health.alive);

    supervisor.start().unwrap();
    let running = supervisor
        .wait_for(Duration::from_secs(5), |s| s.state == SupervisorState::Running)
        .await
        .unwrap();

    let health = get_health(router.clone()).await;
    assert_eq!(
        health,
        HealthResponse {
            alive: true,
            restarts: 0
        }
    );

    // Simulated crash: the 2s backoff keeps the worker down while we look
    let pid = running.pid.unwrap();
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    supervisor
        .wait_for(Duration::from_secs(5), |s| s.restarts == 1)
        .await
        .unwrap();

    let health = get_health(router.clone()).await;
    assert_eq!(
        health,
        HealthResponse {
            alive: false,
            restarts: 1
        }
    );

    supervisor.shutdown(Signal::SIGTERM).await;

    let health = get_health(router).await;
    assert!(!health.alive);
}

#[tokio::test]
async fn health_endpoint_serves_over_tcp_and_stops_gracefully() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = Supervisor::spawn(create_test_options(&temp_dir));
    let router = build_router(supervisor.reader(), PathBuf::from("/nonexistent"));

    // Pick a free port
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap().to_string();
    drop(probe);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server_addr = addr.clone();
    let server = tokio::spawn(async move {
        serve(&server_addr, router, async move {
            let _ = stop_rx.await;
        })
        .await
    });

    // Wait for the listener to come up
    let mut connected = false;
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(&addr).await.is_ok() {
            connected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(connected, "health endpoint never started listening");

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());

    supervisor.shutdown(Signal::SIGTERM).await;
}
