use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Point-in-time resource usage of the supervised child
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
}

/// Samples resource usage of a process by pid
///
/// CPU usage is relative to the previous sample of the same pid, so the first
/// reading for a fresh child is usually zero.
pub struct ProcessMonitor {
    system: System,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh and read usage for `pid`, `None` if the process is gone
    pub fn sample(&mut self, pid: u32) -> Option<ResourceUsage> {
        let sys_pid = Pid::from_u32(pid);

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory().with_cpu(),
        );

        self.system.process(sys_pid).map(|process| ResourceUsage {
            memory_bytes: process.memory(),
            cpu_percent: process.cpu_usage(),
        })
    }
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}
