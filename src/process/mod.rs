// Process module - Worker lifecycle and restart supervision

pub mod handle;
pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use handle::{ChildHandle, ExitEvent, ExitInfo};
pub use restart::{BackoffPolicy, RestartPolicy, RestartTracker};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{StatusReader, Supervisor, SupervisorHandle, SupervisorOptions};
pub use types::{ShutdownOutcome, ShutdownReport, SupervisorState, SupervisorStatus};
