//! # System Metrics — SPEC_FULL.md §9 Ambient Device-Selection Report
//!
//! Generalizes the teacher's `metrics::collect_metrics` (RAM/CPU via
//! `sysinfo`, GPU via macOS IOKit FFI, a file-size reading tied to its own
//! `data/kb.json`) into a portable snapshot: the file-size field is dropped
//! (this crate's store is a `sled` database, not one JSON file, and its size
//! isn't a meaningful per-request metric), and GPU reporting comes from
//! `device::probe()`'s backend label rather than an Apple-only IOKit query,
//! since spec.md's device requirement (GPU preferred/required) must be
//! reportable on any platform.

use std::sync::OnceLock;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::device::Backend;

/// `sysinfo` needs a prior snapshot to compute CPU deltas, so one `System`
/// instance lives for the process lifetime, as the teacher does.
static SYS: OnceLock<Mutex<System>> = OnceLock::new();

fn system() -> &'static Mutex<System> {
    SYS.get_or_init(|| {
        let mut s = System::new();
        s.refresh_cpu_usage();
        Mutex::new(s)
    })
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessMetrics {
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub cpu_active_cores: usize,
    pub cpu_max_core_percent: f32,
    pub cpu_total_cores: usize,
    pub backend: &'static str,
}

/// Takes a snapshot of process/system resource usage plus the currently
/// selected compute backend.
pub fn collect_metrics(backend: Backend) -> ProcessMetrics {
    let pid = Pid::from_u32(std::process::id());

    let mut sys = system().lock();
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);

    let memory_used_mb = sys
        .process(pid)
        .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0);
    let memory_total_mb = sys.total_memory() as f64 / (1024.0 * 1024.0);

    let cpus = sys.cpus();
    let cpu_total_cores = cpus.len();
    let cpu_active_cores = cpus.iter().filter(|c| c.cpu_usage() > 1.0).count();
    let cpu_max_core_percent = cpus.iter().map(|c| c.cpu_usage()).fold(0.0f32, f32::max);

    ProcessMetrics {
        memory_used_mb,
        memory_total_mb,
        cpu_active_cores,
        cpu_max_core_percent,
        cpu_total_cores,
        backend: backend.label(),
    }
}

impl ProcessMetrics {
    /// One-line summary for logs, e.g.
    /// `"RAM 150.3 MB | CPU 4/8 cores peak 85.2% | backend metal"`.
    pub fn summary_line(&self) -> String {
        format!(
            "RAM {:.1} MB | CPU {}/{} cores peak {:.1}% | backend {}",
            self.memory_used_mb,
            self.cpu_active_cores,
            self.cpu_total_cores,
            self.cpu_max_core_percent,
            self.backend,
        )
    }
}
