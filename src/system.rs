//! Cached host totals
//!
//! Total memory and logical core count are needed to derive
//! `cpu_percent_normalized` and `memory_percent`. They are probed once and
//! cached in a process-wide [`SystemInfo`] service; tests call
//! [`SystemInfo::init`] to inject fixed values before anything probes.

use parking_lot::RwLock;
use std::sync::LazyLock;
use tracing::debug;

use crate::record::ResourceRecord;

static GLOBAL: LazyLock<SystemInfo> = LazyLock::new(SystemInfo::new);

/// Host-wide totals used for normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemTotals {
    /// Total physical memory in MB
    pub total_memory_mb: f64,

    /// Logical CPU count
    pub cpu_count: usize,
}

impl SystemTotals {
    /// Probe the running host
    pub fn probe() -> Self {
        Self {
            total_memory_mb: probe_total_memory_mb(),
            cpu_count: num_cpus::get().max(1),
        }
    }

    /// Raw CPU percent divided across all cores, clamped to 0-100
    pub fn normalize_cpu(&self, cpu_percent: f64) -> f64 {
        (cpu_percent / self.cpu_count.max(1) as f64).clamp(0.0, 100.0)
    }

    /// Share of total memory used by `memory_mb`
    pub fn memory_percent(&self, memory_mb: f64) -> f64 {
        if self.total_memory_mb <= 0.0 {
            return 0.0;
        }
        (memory_mb / self.total_memory_mb * 100.0).clamp(0.0, 100.0)
    }

    /// Fill derived fields that a legacy record left at zero
    pub fn fill_derived(&self, record: &mut ResourceRecord) {
        if record.cpu_percent_normalized == 0.0 && record.cpu_percent > 0.0 {
            record.cpu_percent_normalized = round2(self.normalize_cpu(record.cpu_percent));
        }
        if record.memory_percent == 0.0 && record.memory_mb > 0.0 {
            record.memory_percent = round2(self.memory_percent(record.memory_mb));
        }
    }
}

/// Lazily initialized, injectable cache of [`SystemTotals`]
#[derive(Debug, Default)]
pub struct SystemInfo {
    totals: RwLock<Option<SystemTotals>>,
}

impl SystemInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance
    pub fn global() -> &'static SystemInfo {
        &GLOBAL
    }

    /// Set the cached totals. Returns false if they were already set.
    pub fn init(&self, totals: SystemTotals) -> bool {
        let mut guard = self.totals.write();
        if guard.is_some() {
            return false;
        }
        *guard = Some(totals);
        true
    }

    /// Cached totals, probing the host on first use
    pub fn get(&self) -> SystemTotals {
        if let Some(totals) = *self.totals.read() {
            return totals;
        }

        let mut guard = self.totals.write();
        // Another thread may have won the race between the two locks
        if let Some(totals) = *guard {
            return totals;
        }
        let totals = SystemTotals::probe();
        debug!(
            "Probed system totals: {:.0} MB, {} CPUs",
            totals.total_memory_mb, totals.cpu_count
        );
        *guard = Some(totals);
        totals
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(unix)]
fn probe_total_memory_mb() -> f64 {
    // SAFETY: sysconf has no memory-safety preconditions
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages <= 0 || page_size <= 0 {
        return 0.0;
    }
    pages as f64 * page_size as f64 / (1024.0 * 1024.0)
}

#[cfg(not(unix))]
fn probe_total_memory_mb() -> f64 {
    0.0
}
