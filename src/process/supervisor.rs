use crate::config::{Config, ProcessConfig};
use crate::error::{Result, TetherError};
use crate::process::handle::{ChildHandle, ExitEvent, ExitInfo};
use crate::process::restart::{BackoffPolicy, RestartPolicy, RestartTracker};
use crate::process::types::{
    ShutdownOutcome, ShutdownReport, SupervisorState, SupervisorStatus,
};
use nix::sys::signal::Signal;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How long to wait for the kernel to reap a child after SIGKILL
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything the supervisor needs to run one worker
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub process: ProcessConfig,
    pub backoff: BackoffPolicy,
    /// Uptime after which the backoff resets; zero resets on every spawn
    pub min_uptime: Duration,
    /// Bounded wait for the child to exit during shutdown
    pub grace_period: Duration,
    /// Signal used when every handle is dropped without an explicit shutdown
    pub stop_signal: Signal,
}

impl SupervisorOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            process: config.process.clone(),
            backoff: config.backoff()?,
            min_uptime: config.min_uptime(),
            grace_period: config.grace_period(),
            stop_signal: config.stop_signal()?,
        })
    }
}

/// Messages processed one at a time by the supervisor task
#[derive(Debug)]
pub(crate) enum Event {
    Start,
    Exited(ExitEvent),
    RetryDue { generation: u64 },
}

impl From<ExitEvent> for Event {
    fn from(event: ExitEvent) -> Self {
        Event::Exited(event)
    }
}

struct ShutdownRequest {
    signal: Signal,
    reply: oneshot::Sender<ShutdownReport>,
}

struct PendingRestart {
    generation: u64,
    delay: Duration,
    task: JoinHandle<()>,
}

/// Restart-on-exit state machine for a single worker
///
/// Owns the child handle, the backoff and the restart counter. All of them
/// are mutated only from [`Supervisor::run`], which handles one event at a
/// time. Observers read the published [`SupervisorStatus`] instead.
pub struct Supervisor {
    options: SupervisorOptions,
    state: SupervisorState,
    child: Option<ChildHandle>,
    restart_policy: RestartPolicy,
    tracker: RestartTracker,
    generation: u64,
    pending_restart: Option<PendingRestart>,
    last_exit: Option<ExitInfo>,
    last_spawn_error: Option<String>,
    events_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<SupervisorStatus>,
}

impl Supervisor {
    fn new(
        options: SupervisorOptions,
        events_tx: mpsc::UnboundedSender<Event>,
        status_tx: watch::Sender<SupervisorStatus>,
    ) -> Self {
        let restart_policy = RestartPolicy::new(options.backoff);

        Self {
            options,
            state: SupervisorState::Idle,
            child: None,
            restart_policy,
            tracker: RestartTracker::new(),
            generation: 0,
            pending_restart: None,
            last_exit: None,
            last_spawn_error: None,
            events_tx,
            status_tx,
        }
    }

    /// Start the supervisor task in the Idle state
    ///
    /// Nothing is spawned until [`SupervisorHandle::start`] is called.
    pub fn spawn(options: SupervisorOptions) -> SupervisorHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(4);
        let (status_tx, status_rx) =
            watch::channel(SupervisorStatus::new(options.backoff.initial()));

        let supervisor = Supervisor::new(options, events_tx.clone(), status_tx);
        tokio::spawn(supervisor.run(events_rx, shutdown_rx));

        SupervisorHandle {
            events: events_tx,
            shutdown: shutdown_tx,
            status: status_rx,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut shutdown: mpsc::Receiver<ShutdownRequest>,
    ) {
        let backoff = &self.options.backoff;
        info!(
            script = %self.options.process.script.display(),
            initial_delay_ms = backoff.initial().as_millis() as u64,
            max_delay_ms = backoff.max().as_millis() as u64,
            factor = backoff.factor(),
            "Supervisor ready"
        );

        loop {
            tokio::select! {
                // Shutdown wins over any event that is ready at the same time
                biased;

                request = shutdown.recv() => {
                    match request {
                        Some(request) => {
                            let report = self.shutdown(request.signal, &mut events).await;
                            let _ = request.reply.send(report);
                        }
                        None => {
                            debug!("All supervisor handles dropped, shutting down");
                            let signal = self.options.stop_signal;
                            self.shutdown(signal, &mut events).await;
                        }
                    }
                    break;
                }
                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        debug!("Supervisor task finished");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start => self.handle_start(),
            Event::Exited(exit) => self.handle_exit(exit),
            Event::RetryDue { generation } => self.handle_retry_due(generation),
        }
    }

    fn handle_start(&mut self) {
        if self.state.is_terminating() {
            warn!(state = %self.state, "Ignoring start request, supervisor is stopping");
            return;
        }

        if let Some(ref child) = self.child {
            if child.is_alive() {
                info!(pid = child.pid(), "Worker already running, start ignored");
                return;
            }
        }

        self.cancel_pending_restart();
        self.spawn_child();
    }

    fn handle_exit(&mut self, event: ExitEvent) {
        match self.child.take() {
            Some(mut child) if child.generation() == event.generation => {
                child.mark_exited(event.exit.clone());
            }
            other => {
                self.child = other;
                debug!(
                    generation = event.generation,
                    pid = event.pid,
                    "Ignoring exit of a child that is no longer supervised"
                );
                return;
            }
        }
        self.last_exit = Some(event.exit.clone());

        if self.state.is_terminating() {
            info!(pid = event.pid, "Worker exited during shutdown ({})", event.exit);
            return;
        }

        if !self.options.min_uptime.is_zero() && event.exit.uptime() >= self.options.min_uptime {
            debug!(
                uptime_ms = event.exit.uptime_ms,
                "Worker ran long enough, resetting backoff"
            );
            self.restart_policy.reset();
        }

        let reason = format!("Worker (pid {}) exited with {}", event.pid, event.exit);
        self.schedule_restart(&reason);
    }

    fn handle_retry_due(&mut self, generation: u64) {
        let due = self
            .pending_restart
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);

        if !due {
            debug!(generation, "Ignoring stale restart timer");
            return;
        }

        self.pending_restart = None;
        self.spawn_child();
    }

    fn spawn_child(&mut self) {
        self.transition(SupervisorState::Starting);
        self.generation += 1;

        match ChildHandle::start(&self.options.process, self.generation, self.events_tx.clone()) {
            Ok(child) => {
                info!(
                    pid = child.pid(),
                    generation = self.generation,
                    "Worker started"
                );
                if self.options.min_uptime.is_zero() {
                    self.restart_policy.reset();
                }
                self.last_spawn_error = None;
                self.child = Some(child);
                self.transition(SupervisorState::Running);
            }
            Err(e) => {
                error!(kind = e.kind(), "Failed to spawn worker: {}", e);
                self.last_spawn_error = Some(e.to_string());
                let reason = format!("Spawn failed ({})", e.kind());
                self.schedule_restart(&reason);
            }
        }
    }

    fn schedule_restart(&mut self, reason: &str) {
        self.tracker.record_restart();
        let delay = self.restart_policy.schedule();
        let generation = self.generation;

        warn!(
            restarts = self.tracker.restart_count(),
            delay_ms = delay.as_millis() as u64,
            "{}; restarting in {:?}",
            reason,
            delay
        );

        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::RetryDue { generation });
        });

        self.pending_restart = Some(PendingRestart {
            generation,
            delay,
            task,
        });
        self.transition(SupervisorState::Restarting);
    }

    fn cancel_pending_restart(&mut self) {
        if let Some(pending) = self.pending_restart.take() {
            pending.task.abort();
            debug!(generation = pending.generation, "Canceled pending restart");
        }
    }

    async fn shutdown(
        &mut self,
        signal: Signal,
        events: &mut mpsc::UnboundedReceiver<Event>,
    ) -> ShutdownReport {
        if self.state == SupervisorState::Stopped {
            return ShutdownReport::already_stopped();
        }

        let began = Instant::now();
        info!(signal = signal.as_str(), state = %self.state, "Shutting down supervisor");

        self.cancel_pending_restart();
        self.transition(SupervisorState::ShuttingDown);

        let live = self
            .child
            .as_ref()
            .filter(|child| child.is_alive())
            .map(|child| (child.pid(), child.generation()));

        let Some((pid, generation)) = live else {
            self.child = None;
            self.transition(SupervisorState::Stopped);
            return ShutdownReport {
                outcome: ShutdownOutcome::NoChild,
                terminate_requests: 0,
                exit: None,
                elapsed: began.elapsed(),
            };
        };

        let mut terminate_requests = 0;
        if let Some(ref child) = self.child {
            if !child.terminate(signal) {
                debug!(pid, "Worker already reaped, waiting for its exit event");
            }
            terminate_requests += 1;
        }

        debug!(
            pid,
            "Waiting {:?} for worker to exit", self.options.grace_period
        );

        let deadline = Instant::now() + self.options.grace_period;
        let (outcome, exit) = match Self::wait_for_exit(events, generation, deadline).await {
            Some(exit) => {
                info!(pid, "Worker exited gracefully with {}", exit);
                (ShutdownOutcome::Exited, Some(exit))
            }
            None => {
                warn!(
                    pid,
                    "Worker did not exit within {:?}, sending SIGKILL", self.options.grace_period
                );
                if let Some(ref child) = self.child {
                    child.kill();
                }
                let reaped =
                    Self::wait_for_exit(events, generation, Instant::now() + KILL_REAP_TIMEOUT)
                        .await;
                if reaped.is_none() {
                    error!(pid, "Worker was not reaped after SIGKILL, stopping anyway");
                }
                (ShutdownOutcome::Killed, reaped)
            }
        };

        if let Some(ref exit) = exit {
            self.last_exit = Some(exit.clone());
        }
        self.child = None;
        self.transition(SupervisorState::Stopped);

        ShutdownReport {
            outcome,
            terminate_requests,
            exit,
            elapsed: began.elapsed(),
        }
    }

    /// Drain the mailbox until the exit of `generation` arrives or `deadline` passes
    ///
    /// Any other event is dropped: nothing may be started while shutting down.
    async fn wait_for_exit(
        events: &mut mpsc::UnboundedReceiver<Event>,
        generation: u64,
        deadline: Instant,
    ) -> Option<ExitInfo> {
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(Event::Exited(event))) if event.generation == generation => {
                    return Some(event.exit);
                }
                Ok(Some(event)) => debug!(?event, "Dropping event during shutdown"),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Supervisor state change");
            self.state = next;
        }
        self.publish();
    }

    fn snapshot(&self) -> SupervisorStatus {
        let live_child = self.child.as_ref().filter(|child| child.is_alive());

        SupervisorStatus {
            state: self.state,
            pid: live_child.map(|child| child.pid()),
            generation: self.generation,
            restarts: self.tracker.restart_count(),
            next_delay: self.restart_policy.current_delay(),
            pending_delay: self.pending_restart.as_ref().map(|pending| pending.delay),
            started_at: live_child.map(|child| child.started_at()),
            last_exit: self.last_exit.clone(),
            last_spawn_error: self.last_spawn_error.clone(),
            last_restart: self.tracker.last_restart_time(),
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }
}

/// Cloneable control surface of a running supervisor
#[derive(Clone)]
pub struct SupervisorHandle {
    events: mpsc::UnboundedSender<Event>,
    shutdown: mpsc::Sender<ShutdownRequest>,
    status: watch::Receiver<SupervisorStatus>,
}

impl SupervisorHandle {
    /// Ask the supervisor to launch the worker
    ///
    /// A no-op when the worker is already alive.
    pub fn start(&self) -> Result<()> {
        self.events
            .send(Event::Start)
            .map_err(|_| TetherError::SupervisorGone)
    }

    /// Stop supervising: terminate the worker with `signal` and wait for Stopped
    pub async fn shutdown(&self, signal: Signal) -> ShutdownReport {
        let (reply, response) = oneshot::channel();

        if self
            .shutdown
            .send(ShutdownRequest { signal, reply })
            .await
            .is_err()
        {
            return ShutdownReport::already_stopped();
        }

        response
            .await
            .unwrap_or_else(|_| ShutdownReport::already_stopped())
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.status.borrow().state
    }

    pub fn restarts(&self) -> u64 {
        self.status.borrow().restarts
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    /// Read-only view for observers such as the health endpoint
    pub fn reader(&self) -> StatusReader {
        StatusReader {
            status: self.status.clone(),
        }
    }

    /// Wait until a published status satisfies `predicate`
    ///
    /// Intermediate states may be skipped, so predicates should prefer
    /// monotonic fields such as `restarts` or `generation`.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<SupervisorStatus>
    where
        F: FnMut(&SupervisorStatus) -> bool,
    {
        self.reader().wait_for(timeout, predicate).await
    }
}

/// Read-only access to the latest supervisor status
///
/// Holds no way to start, stop or signal the worker.
#[derive(Clone)]
pub struct StatusReader {
    status: watch::Receiver<SupervisorStatus>,
}

impl StatusReader {
    pub fn snapshot(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    pub fn is_alive(&self) -> bool {
        self.status.borrow().is_alive()
    }

    pub fn restarts(&self) -> u64 {
        self.status.borrow().restarts
    }

    pub async fn wait_for<F>(&self, timeout: Duration, mut predicate: F) -> Option<SupervisorStatus>
    where
        F: FnMut(&SupervisorStatus) -> bool,
    {
        let mut rx = self.status.clone();

        let wait = async move {
            loop {
                {
                    let status = rx.borrow_and_update();
                    if predicate(&status) {
                        return Some(status.clone());
                    }
                }

                if rx.changed().await.is_err() {
                    let status = rx.borrow();
                    return predicate(&status).then(|| status.clone());
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }
}

impl From<watch::Receiver<SupervisorStatus>> for StatusReader {
    fn from(status: watch::Receiver<SupervisorStatus>) -> Self {
        Self { status }
    }
}
