use crate::config::ProcessConfig;
use crate::error::{Result, SpawnError, TetherError};
use crate::process::spawner::spawn_process;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant, SystemTime};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

/// How a child process ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub uptime_ms: u64,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus, uptime: Duration) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
            uptime_ms: uptime.as_millis() as u64,
        }
    }

    /// Exit whose status could not be collected
    pub fn unknown(uptime: Duration) -> Self {
        Self {
            code: None,
            signal: None,
            uptime_ms: uptime.as_millis() as u64,
        }
    }

    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }

    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(named) => write!(f, "signal {} ({})", sig, named.as_str()),
                Err(_) => write!(f, "signal {}", sig),
            },
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// The single terminal event of one child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitEvent {
    pub generation: u64,
    pub pid: u32,
    pub exit: ExitInfo,
}

/// Which pipe a forwarded line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Owner-side view of one running child
///
/// The OS child itself lives in a waiter task, which reaps it and reports
/// exactly one [`ExitEvent`]. Signals are routed through that task so they can
/// never reach a recycled pid.
#[derive(Debug)]
pub struct ChildHandle {
    pid: u32,
    generation: u64,
    started_at: SystemTime,
    exit: Option<ExitInfo>,
    control: mpsc::UnboundedSender<Signal>,
}

impl ChildHandle {
    /// Spawn the configured worker and start supervising its pipes and exit
    ///
    /// # Arguments
    /// * `config` - What to launch
    /// * `generation` - Spawn number echoed back in the exit event
    /// * `events` - Mailbox that receives the exit event
    pub fn start<E>(
        config: &ProcessConfig,
        generation: u64,
        events: mpsc::UnboundedSender<E>,
    ) -> std::result::Result<Self, SpawnError>
    where
        E: From<ExitEvent> + Send + 'static,
    {
        let mut spawned = spawn_process(config)?;
        let pid = spawned.pid;

        if let Some(stdout) = spawned.child.stdout.take() {
            tokio::spawn(forward_output(stdout, OutputStream::Stdout, pid));
        }
        if let Some(stderr) = spawned.child.stderr.take() {
            tokio::spawn(forward_output(stderr, OutputStream::Stderr, pid));
        }

        let started = Instant::now();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        tokio::spawn(wait_for_exit(
            spawned.child,
            pid,
            generation,
            started,
            control_rx,
            events,
        ));

        tracing::debug!(pid, generation, script = %spawned.script.display(), "Child started");

        Ok(Self {
            pid,
            generation,
            started_at: SystemTime::now(),
            exit: None,
            control: control_tx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn is_alive(&self) -> bool {
        self.exit.is_none()
    }

    /// Record the observed exit; only the exit event may call this
    pub fn mark_exited(&mut self, exit: ExitInfo) {
        self.exit = Some(exit);
    }

    /// Ask the child to stop with `signal`
    ///
    /// Does not wait. Returns `false` when the child has already been reaped.
    pub fn terminate(&self, signal: Signal) -> bool {
        self.control.send(signal).is_ok()
    }

    /// Force the child down with SIGKILL
    pub fn kill(&self) -> bool {
        self.terminate(Signal::SIGKILL)
    }
}

/// Parse a signal name such as `SIGTERM`
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(TetherError::SignalError(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}

async fn wait_for_exit<E>(
    mut child: Child,
    pid: u32,
    generation: u64,
    started: Instant,
    mut control: mpsc::UnboundedReceiver<Signal>,
    events: mpsc::UnboundedSender<E>,
) where
    E: From<ExitEvent> + Send + 'static,
{
    let exit = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => ExitInfo::from_status(status, started.elapsed()),
                    Err(e) => {
                        tracing::error!(pid, "Failed to wait for child: {}", e);
                        ExitInfo::unknown(started.elapsed())
                    }
                };
            }
            Some(sig) = control.recv() => {
                // id() is None once the child has been reaped. The child leads
                // its own process group, so helpers it started get the signal too.
                if let Some(live_pid) = child.id() {
                    if let Err(e) = signal::killpg(Pid::from_raw(live_pid as i32), sig) {
                        tracing::warn!(pid, "Failed to send {} to child: {}", sig.as_str(), e);
                    } else {
                        tracing::debug!(pid, "Sent {} to child process group", sig.as_str());
                    }
                }
            }
        }
    };
    drop(control);

    let event = ExitEvent {
        generation,
        pid,
        exit,
    };

    if events.send(E::from(event)).is_err() {
        tracing::debug!(pid, generation, "Exit event dropped, supervisor is gone");
    }
}

/// Longer lines are split so a stream without newlines cannot grow unbounded
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Consecutive read failures tolerated before the pipe is given up
const MAX_READ_ERRORS: u32 = 8;

/// Pass child output through to the log, one event per line
///
/// Bytes are not interpreted: invalid UTF-8 is logged lossily and the pipe is
/// drained until EOF, so the child never sees a closed pipe while running.
async fn forward_output<R>(reader: R, stream: OutputStream, pid: u32)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::with_capacity(256);
    let mut errors = 0;

    loop {
        let available = match reader.fill_buf().await {
            Ok(available) => available,
            Err(e) => {
                errors += 1;
                tracing::debug!(pid, stream = stream.as_str(), "Error reading child output: {}", e);
                if errors >= MAX_READ_ERRORS {
                    break;
                }
                continue;
            }
        };
        errors = 0;

        if available.is_empty() {
            if !line.is_empty() {
                emit_line(&line, stream, pid);
            }
            break;
        }

        let room = MAX_LINE_BYTES - line.len();
        let window = &available[..available.len().min(room)];
        let (consumed, complete) = match window.iter().position(|&b| b == b'\n') {
            Some(end) => {
                line.extend_from_slice(&window[..end]);
                (end + 1, true)
            }
            None => {
                line.extend_from_slice(window);
                (window.len(), line.len() >= MAX_LINE_BYTES)
            }
        };
        reader.consume(consumed);

        if complete {
            emit_line(&line, stream, pid);
            line.clear();
        }
    }
}

fn emit_line(bytes: &[u8], stream: OutputStream, pid: u32) {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    let line = String::from_utf8_lossy(bytes);

    match stream {
        OutputStream::Stdout => {
            tracing::info!(target: "tether::child", stream = stream.as_str(), pid, "{}", line)
        }
        OutputStream::Stderr => {
            tracing::warn!(target: "tether::child", stream = stream.as_str(), pid, "{}", line)
        }
    }
}
