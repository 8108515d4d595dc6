//! Memory telemetry.
//!
//! The simulation shows the program's memory use. The figure is resident
//! memory in megabytes, minus what the process already used when the
//! session was created, and never below one.

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

const BYTES_PER_MB: f64 = 1e6;

pub struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
    baseline_mb: f64,
}

impl std::fmt::Debug for MemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProbe")
            .field("pid", &self.pid)
            .field("baseline_mb", &self.baseline_mb)
            .finish_non_exhaustive()
    }
}

impl MemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!("memory telemetry unavailable: {e}");
                None
            }
        };
        let mut probe = Self {
            system: System::new(),
            pid,
            baseline_mb: 0.0,
        };
        probe.baseline_mb = probe.resident_mb().unwrap_or(0.0).ceil();
        probe
    }

    fn resident_mb(&mut self) -> Option<f64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        let bytes = self.system.process(pid)?.memory();
        Some(bytes as f64 / BYTES_PER_MB)
    }

    /// Memory used since the session was created, in megabytes.
    pub fn sample(&mut self) -> f32 {
        let used = self.resident_mb().map_or(0.0, |mb| mb - self.baseline_mb);
        used.max(1.0) as f32
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}
