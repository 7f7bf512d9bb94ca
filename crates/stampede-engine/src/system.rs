//! Process CPU and memory sampling.

use stampede_core::SystemMetrics;
use sysinfo::{get_current_pid, Pid, ProcessExt, System, SystemExt};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Samples resource usage of the current process.
pub struct SystemSampler {
    system: System,
    pid: Pid,
}

impl SystemSampler {
    /// Returns `None` when the current process id cannot be determined.
    pub fn new() -> Option<Self> {
        let pid = match get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::warn!("System metrics disabled: {}", e);
                return None;
            }
        };

        let mut system = System::new();
        // Prime CPU accounting; the first reading is always zero
        system.refresh_process(pid);
        Some(Self { system, pid })
    }

    pub fn sample(&mut self) -> Option<SystemMetrics> {
        if !self.system.refresh_process(self.pid) {
            return None;
        }

        self.system.process(self.pid).map(|process| SystemMetrics {
            cpu_usage: f64::from(process.cpu_usage()),
            memory_mb: process.memory() as f64 / BYTES_PER_MB,
        })
    }
}
