use crate::process::handle::ExitInfo;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Restarting,
    ShuttingDown,
    Stopped,
}

impl SupervisorState {
    /// No restart may be scheduled from these states
    pub fn is_terminating(&self) -> bool {
        matches!(self, SupervisorState::ShuttingDown | SupervisorState::Stopped)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Restarting => write!(f, "restarting"),
            SupervisorState::ShuttingDown => write!(f, "shutting_down"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published by the supervisor after every transition
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    /// Number of spawn attempts so far, successful or not
    pub generation: u64,
    pub restarts: u64,
    /// Delay the next restart will wait
    pub next_delay: Duration,
    /// Delay of the restart currently pending, if any
    pub pending_delay: Option<Duration>,
    pub started_at: Option<SystemTime>,
    pub last_exit: Option<ExitInfo>,
    pub last_spawn_error: Option<String>,
    pub last_restart: Option<SystemTime>,
}

impl SupervisorStatus {
    pub fn new(next_delay: Duration) -> Self {
        Self {
            state: SupervisorState::Idle,
            pid: None,
            generation: 0,
            restarts: 0,
            next_delay,
            pending_delay: None,
            started_at: None,
            last_exit: None,
            last_spawn_error: None,
            last_restart: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == SupervisorState::Running
    }

    /// Uptime of the current child, if one is running
    pub fn uptime(&self) -> Option<Duration> {
        if !self.is_alive() {
            return None;
        }

        self.started_at.map(|started| {
            SystemTime::now()
                .duration_since(started)
                .unwrap_or(Duration::from_secs(0))
        })
    }
}

/// How the child was brought down during shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// No child was alive when shutdown began
    NoChild,
    /// Child exited within the grace period
    Exited,
    /// Grace period elapsed, child was sent SIGKILL
    Killed,
    /// Supervisor had already stopped
    AlreadyStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    /// Number of termination requests sent to the child (SIGKILL excluded)
    pub terminate_requests: u32,
    pub exit: Option<ExitInfo>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn already_stopped() -> Self {
        Self {
            outcome: ShutdownOutcome::AlreadyStopped,
            terminate_requests: 0,
            exit: None,
            elapsed: Duration::ZERO,
        }
    }
}
