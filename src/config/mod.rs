use crate::error::{Result, TetherError};
use crate::process::handle::parse_signal;
use crate::process::restart::BackoffPolicy;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete supervisor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub process: ProcessConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

/// How to launch the supervised worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Path to the script or executable, relative paths resolve against `cwd`
    #[serde(default)]
    pub script: PathBuf,

    /// Optional interpreter used to run the script (e.g. `node`, `python3`)
    #[serde(default)]
    pub interpreter: Option<PathBuf>,

    /// Working directory for the child (defaults to the current directory)
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Signal sent to the child on shutdown
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// How long to wait for the child to exit before SIGKILL (milliseconds)
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

/// Backoff and crash-loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Uptime after which a child counts as healthy and the backoff resets.
    /// Zero resets on every successful spawn.
    #[serde(default = "default_min_uptime")]
    pub min_uptime_ms: u64,
}

/// Health endpoint listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `index.html` served on `GET /`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

// Default value functions for serde
fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_grace_period() -> u64 {
    10_000
}

fn default_initial_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    1.5
}

fn default_min_uptime() -> u64 {
    10_000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            script: PathBuf::new(),
            interpreter: None,
            cwd: None,
            stop_signal: default_stop_signal(),
            grace_period_ms: default_grace_period(),
        }
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            min_uptime_ms: default_min_uptime(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl Config {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TetherError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config: Config = match extension {
            "toml" => toml::from_str(&contents)
                .map_err(|e| TetherError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| TetherError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?,
            _ => {
                return Err(TetherError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Called once at startup, before anything is spawned.
    pub fn validate(&self) -> Result<()> {
        if self.process.script.as_os_str().is_empty() {
            return Err(TetherError::MissingConfigField("script".to_string()));
        }

        parse_signal(&self.process.stop_signal)?;

        if self.process.grace_period_ms == 0 {
            return Err(TetherError::ConfigValidationError(
                "grace_period_ms must be greater than zero".to_string(),
            ));
        }

        self.backoff()?;

        if let Some(ref cwd) = self.process.cwd {
            if !cwd.is_dir() {
                return Err(TetherError::ConfigValidationError(format!(
                    "Working directory does not exist or is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        if self.http.host.is_empty() {
            return Err(TetherError::MissingConfigField("http.host".to_string()));
        }

        Ok(())
    }

    /// Build the backoff policy described by the restart section
    pub fn backoff(&self) -> Result<BackoffPolicy> {
        BackoffPolicy::new(
            Duration::from_millis(self.restart.initial_delay_ms),
            Duration::from_millis(self.restart.max_delay_ms),
            self.restart.backoff_factor,
        )
    }

    pub fn stop_signal(&self) -> Result<Signal> {
        parse_signal(&self.process.stop_signal)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.process.grace_period_ms)
    }

    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.restart.min_uptime_ms)
    }

    /// Address the health endpoint binds to
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    /// Expand environment variables in path fields
    fn expand_env_vars(&mut self) {
        self.process.script = expand_env_in_path(&self.process.script);

        if let Some(ref interpreter) = self.process.interpreter {
            self.process.interpreter = Some(expand_env_in_path(interpreter));
        }

        if let Some(ref cwd) = self.process.cwd {
            self.process.cwd = Some(expand_env_in_path(cwd));
        }

        self.http.static_dir = expand_env_in_path(&self.http.static_dir);
    }
}

/// Expand `$VAR` and `${VAR}` references in a string
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.process.script = PathBuf::from("worker.sh");
        config
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.restart.initial_delay_ms, 2000);
        assert_eq!(config.restart.max_delay_ms, 60_000);
        assert_eq!(config.restart.backoff_factor, 1.5);
        assert_eq!(config.process.stop_signal, "SIGTERM");
        assert_eq!(config.grace_period(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_script() {
        let config = Config::default();

        match config.validate() {
            Err(TetherError::MissingConfigField(field)) => assert_eq!(field, "script"),
            other => panic!("Expected MissingConfigField, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_zero_initial_delay() {
        let mut config = valid_config();
        config.restart.initial_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_factor_below_one_is_accepted() {
        let mut config = valid_config();
        config.restart.backoff_factor = 0.8;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_stop_signal() {
        let mut config = valid_config();
        config.process.stop_signal = "SIGFOO".to_string();

        match config.validate() {
            Err(TetherError::SignalError(msg)) => assert!(msg.contains("SIGFOO")),
            other => panic!("Expected SignalError, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_missing_cwd() {
        let mut config = valid_config();
        config.process.cwd = Some(PathBuf::from("/nonexistent/tether/dir"));
        assert!(matches!(
            config.validate(),
            Err(TetherError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_from_file_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tether.toml");
        fs::write(
            &path,
            r#"
                [process]
                script = "bot.js"
                interpreter = "node"

                [restart]
                initial_delay_ms = 500
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.process.script, PathBuf::from("bot.js"));
        assert_eq!(config.process.interpreter, Some(PathBuf::from("node")));
        assert_eq!(config.restart.initial_delay_ms, 500);
        assert_eq!(config.restart.max_delay_ms, 60_000);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tether.yaml");
        fs::write(&path, "process: {}").unwrap();

        assert!(matches!(
            Config::from_file(&path),
            Err(TetherError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_expand_env_vars_in_paths() {
        std::env::set_var("TETHER_TEST_ROOT", "/srv/bot");

        let mut config = valid_config();
        config.process.script = PathBuf::from("${TETHER_TEST_ROOT}/index.js");
        config.process.cwd = Some(PathBuf::from("$TETHER_TEST_ROOT"));
        config.expand_env_vars();

        assert_eq!(config.process.script, PathBuf::from("/srv/bot/index.js"));
        assert_eq!(config.process.cwd, Some(PathBuf::from("/srv/bot")));

        std::env::remove_var("TETHER_TEST_ROOT");
    }
}
