use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Samples the resident memory of a single child process.
///
/// The peak is shared through an atomic so the caller can still read it after
/// the sampling future has been dropped by a `select!`.
pub struct ProcessMonitor {
    system: System,
    pid: Pid,
    peak_bytes: Arc<AtomicU64>,
    interval: Duration,
}

impl ProcessMonitor {
    pub fn new(pid: u32, interval: Duration) -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(pid),
            peak_bytes: Arc::new(AtomicU64::new(0)),
            interval,
        }
    }

    pub fn peak_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.peak_bytes)
    }

    /// Current resident memory in bytes, or `None` once the process is gone.
    pub fn sample(&mut self) -> Option<u64> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let memory = self.system.process(self.pid)?.memory();
        self.peak_bytes.fetch_max(memory, Ordering::Relaxed);
        Some(memory)
    }

    /// Resolves with the observed usage once it goes above `ceiling`.
    /// Never resolves while the process stays under the ceiling.
    pub async fn watch_ceiling(mut self, ceiling: u64) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Some(memory) = self.sample() {
                if memory > ceiling {
                    tracing::warn!(
                        "Process {} is using {} bytes, above ceiling of {} bytes",
                        self.pid,
                        memory,
                        ceiling
                    );
                    return memory;
                }
            }
        }
    }
}
