use crate::config::ProcessConfig;
use crate::error::SpawnError;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Metadata returned when spawning a process
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The child process handle
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// Script path the child was started from
    pub script: PathBuf,
}

/// Resolve the configured script against the working directory
pub fn resolve_script(config: &ProcessConfig) -> PathBuf {
    match config.cwd {
        Some(ref cwd) if config.script.is_relative() => cwd.join(&config.script),
        _ => config.script.clone(),
    }
}

/// Spawn the supervised worker described by `config`
///
/// The child gets no arguments beyond the optional interpreter and the script
/// itself. Stdout and stderr are piped so the caller can forward them, and the
/// child leads a new process group whose id equals its pid.
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Successfully spawned process with metadata
/// * `Err(SpawnError::NotFound)` - Script or interpreter does not exist
/// * `Err(SpawnError::OsRefused)` - Any other OS-level spawn failure
pub fn spawn_process(config: &ProcessConfig) -> Result<SpawnedProcess, SpawnError> {
    let script = resolve_script(config);

    if !script.exists() {
        return Err(SpawnError::NotFound { path: script });
    }

    let (program, mut command) = match config.interpreter {
        Some(ref interpreter) => {
            let mut command = Command::new(interpreter);
            command.arg(&script);
            (interpreter.clone(), command)
        }
        None => (script.clone(), Command::new(&script)),
    };

    if let Some(ref cwd) = config.cwd {
        command.current_dir(cwd);
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);
    // Own process group so stop signals also reach anything the worker starts
    command.process_group(0);

    let child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => SpawnError::NotFound {
            path: program.clone(),
        },
        _ => SpawnError::OsRefused {
            path: program.clone(),
            source: e,
        },
    })?;

    // A child that was reaped before we asked has no pid left
    let pid = child.id().ok_or_else(|| SpawnError::OsRefused {
        path: program,
        source: std::io::Error::new(ErrorKind::Other, "child exited before its pid was read"),
    })?;

    Ok(SpawnedProcess { child, pid, script })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn create_test_config(script: PathBuf) -> ProcessConfig {
        ProcessConfig {
            script,
            ..ProcessConfig::default()
        }
    }

    fn write_script(dir: &TempDir, name: &str, body: &str, mode: u32) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_spawn_simple_process() {
        let config = create_test_config(PathBuf::from("/bin/echo"));

        let spawned = spawn_process(&config).unwrap();
        assert!(spawned.pid > 0);
        assert_eq!(spawned.script, PathBuf::from("/bin/echo"));
    }

    #[tokio::test]
    async fn test_spawn_leads_own_process_group() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(&temp_dir, "worker.sh", "exec sleep 5", 0o755);

        let mut spawned = spawn_process(&create_test_config(script)).unwrap();
        let pid = nix::unistd::Pid::from_raw(spawned.pid as i32);
        assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), pid);

        spawned.child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_captures_stdout_stderr() {
        let config = create_test_config(PathBuf::from("/bin/echo"));

        let spawned = spawn_process(&config).unwrap();
        assert!(spawned.child.stdout.is_some());
        assert!(spawned.child.stderr.is_some());
    }

    #[tokio::test]
    async fn test_spawn_relative_script_in_working_directory() {
        let temp_dir = TempDir::new().unwrap();
        write_script(&temp_dir, "worker.sh", "exit 0", 0o755);

        let mut config = create_test_config(PathBuf::from("worker.sh"));
        config.cwd = Some(temp_dir.path().to_path_buf());

        let mut spawned = spawn_process(&config).unwrap();
        assert_eq!(spawned.script, temp_dir.path().join("worker.sh"));

        let status = spawned.child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_with_interpreter() {
        let temp_dir = TempDir::new().unwrap();
        // Not executable: only runnable through the interpreter
        write_script(&temp_dir, "worker.sh", "exit 3", 0o644);

        let mut config = create_test_config(PathBuf::from("worker.sh"));
        config.cwd = Some(temp_dir.path().to_path_buf());
        config.interpreter = Some(PathBuf::from("/bin/sh"));

        let mut spawned = spawn_process(&config).unwrap();
        let status = spawned.child.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_script() {
        let config = create_test_config(PathBuf::from("/nonexistent/script"));

        match spawn_process(&config) {
            Err(SpawnError::NotFound { path }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/script"));
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_interpreter() {
        let mut config = create_test_config(PathBuf::from("/bin/echo"));
        config.interpreter = Some(PathBuf::from("/nonexistent/interpreter"));

        assert!(matches!(
            spawn_process(&config),
            Err(SpawnError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_spawn_not_executable_is_os_refused() {
        let temp_dir = TempDir::new().unwrap();
        let script = write_script(&temp_dir, "worker.sh", "exit 0", 0o644);

        let config = create_test_config(script);

        match spawn_process(&config) {
            Err(err @ SpawnError::OsRefused { .. }) => assert_eq!(err.kind(), "os_refused"),
            other => panic!("Expected OsRefused, got {:?}", other),
        }
    }
}
