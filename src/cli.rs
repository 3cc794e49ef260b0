// CLI module - flags and environment layered over the config file

use crate::config::Config;
use crate::error::Result;
use clap::Parser;
use std::path::PathBuf;

/// tether - keep a single worker process alive and report its health over HTTP
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the worker script or executable
    #[arg(env = "TETHER_SCRIPT")]
    pub script: Option<PathBuf>,

    /// TOML or JSON configuration file
    #[arg(short, long, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port for the health endpoint
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Address the health endpoint binds to
    #[arg(long, env = "TETHER_HOST")]
    pub host: Option<String>,

    /// Interpreter used to run the script (e.g. node, python3)
    #[arg(short, long, env = "TETHER_INTERPRETER")]
    pub interpreter: Option<PathBuf>,

    /// Working directory for the worker
    #[arg(long, env = "TETHER_CWD")]
    pub cwd: Option<PathBuf>,

    /// Directory with index.html and other static assets
    #[arg(long, env = "TETHER_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// First restart delay in milliseconds
    #[arg(long, env = "TETHER_INITIAL_DELAY_MS")]
    pub initial_delay_ms: Option<u64>,

    /// Upper bound for the restart delay in milliseconds
    #[arg(long, env = "TETHER_MAX_DELAY_MS")]
    pub max_delay_ms: Option<u64>,

    /// Backoff growth factor
    #[arg(long, env = "TETHER_BACKOFF_FACTOR")]
    pub factor: Option<f64>,

    /// Uptime in milliseconds after which the backoff resets (0 = every spawn)
    #[arg(long, env = "TETHER_MIN_UPTIME_MS")]
    pub min_uptime_ms: Option<u64>,

    /// How long to wait for the worker to stop before SIGKILL, in milliseconds
    #[arg(long, env = "TETHER_GRACE_PERIOD_MS")]
    pub grace_period_ms: Option<u64>,

    /// Signal sent to the worker on shutdown
    #[arg(long, env = "TETHER_STOP_SIGNAL")]
    pub stop_signal: Option<String>,

    /// Log filter directive
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log: String,
}

impl Cli {
    /// Build the effective configuration: file, then flags and environment
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };

        self.apply_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref script) = self.script {
            config.process.script = script.clone();
        }
        if let Some(ref interpreter) = self.interpreter {
            config.process.interpreter = Some(interpreter.clone());
        }
        if let Some(ref cwd) = self.cwd {
            config.process.cwd = Some(cwd.clone());
        }
        if let Some(ref stop_signal) = self.stop_signal {
            config.process.stop_signal = stop_signal.clone();
        }
        if let Some(grace_period_ms) = self.grace_period_ms {
            config.process.grace_period_ms = grace_period_ms;
        }
        if let Some(initial_delay_ms) = self.initial_delay_ms {
            config.restart.initial_delay_ms = initial_delay_ms;
        }
        if let Some(max_delay_ms) = self.max_delay_ms {
            config.restart.max_delay_ms = max_delay_ms;
        }
        if let Some(factor) = self.factor {
            config.restart.backoff_factor = factor;
        }
        if let Some(min_uptime_ms) = self.min_uptime_ms {
            config.restart.min_uptime_ms = min_uptime_ms;
        }
        if let Some(port) = self.port {
            config.http.port = port;
        }
        if let Some(ref host) = self.host {
            config.http.host = host.clone();
        }
        if let Some(ref static_dir) = self.static_dir {
            config.http.static_dir = static_dir.clone();
        }
    }
}
