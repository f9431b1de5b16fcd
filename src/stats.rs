//! Per-process summary statistics
//!
//! [`aggregate`] does the raw, unsorted computation; [`sort_stats`] applies
//! one of the documented orders. Both storage backends feed records through
//! the same code in the same (chronological) order, so their numbers match.
//!
//! The representative command, working directory and category of a group
//! come from the first record seen for that group. Callers that want the most
//! frequent value must compute it from the raw records.

use crate::record::ResourceRecord;
use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

/// Aggregation options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsOptions {
    /// Group by category when a record has one
    pub group_by_category: bool,

    /// Producer sampling interval; each active sample counts for this long
    pub sampling_interval: Duration,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            group_by_category: false,
            sampling_interval: Duration::from_secs(5),
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsOrder {
    /// Average CPU, highest first
    #[default]
    CpuAvgDesc,
    /// Estimated active time, longest first
    ActiveTimeDesc,
    /// First-seen order, as produced by [`aggregate`]
    Unsorted,
}

/// Running average and maximum of one metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Metric {
    pub avg: f64,
    pub max: f64,
    #[serde(skip)]
    sum: f64,
}

impl Metric {
    fn add(&mut self, value: f64, first: bool) {
        self.sum += value;
        if first || value > self.max {
            self.max = value;
        }
    }

    fn finish(&mut self, samples: u64) {
        if samples > 0 {
            self.avg = self.sum / samples as f64;
        }
    }
}

/// Summary of one group of records
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStats {
    /// Process name, or category when grouping by category
    pub key: String,

    pub name: String,
    pub command: String,
    pub working_dir: String,
    pub category: String,

    pub samples: u64,
    pub active_samples: u64,

    pub cpu: Metric,
    pub memory_mb: Metric,
    pub disk_read_mb: Metric,
    pub disk_write_mb: Metric,
    pub net_sent_kb: Metric,
    pub net_recv_kb: Metric,

    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,

    /// `last_seen - first_seen`
    #[serde(with = "duration_secs")]
    pub total_span: Duration,

    /// `active_samples × sampling_interval`
    #[serde(with = "duration_secs")]
    pub active_time: Duration,
}

impl ResourceStats {
    fn start(key: &str, first: &ResourceRecord) -> Self {
        Self {
            key: key.to_string(),
            name: first.name.clone(),
            command: first.command.clone(),
            working_dir: first.working_dir.clone(),
            category: first.category.clone(),
            samples: 0,
            active_samples: 0,
            cpu: Metric::default(),
            memory_mb: Metric::default(),
            disk_read_mb: Metric::default(),
            disk_write_mb: Metric::default(),
            net_sent_kb: Metric::default(),
            net_recv_kb: Metric::default(),
            first_seen: first.timestamp,
            last_seen: first.timestamp,
            total_span: Duration::ZERO,
            active_time: Duration::ZERO,
        }
    }

    fn add(&mut self, r: &ResourceRecord) {
        let first = self.samples == 0;
        self.samples += 1;
        if r.is_active {
            self.active_samples += 1;
        }
        self.cpu.add(r.cpu_percent, first);
        self.memory_mb.add(r.memory_mb, first);
        self.disk_read_mb.add(r.disk_read_mb, first);
        self.disk_write_mb.add(r.disk_write_mb, first);
        self.net_sent_kb.add(r.net_sent_kb, first);
        self.net_recv_kb.add(r.net_recv_kb, first);
        self.first_seen = self.first_seen.min(r.timestamp);
        self.last_seen = self.last_seen.max(r.timestamp);
    }

    fn finish(&mut self, sampling_interval: Duration) {
        for metric in [
            &mut self.cpu,
            &mut self.memory_mb,
            &mut self.disk_read_mb,
            &mut self.disk_write_mb,
            &mut self.net_sent_kb,
            &mut self.net_recv_kb,
        ] {
            metric.finish(self.samples);
        }
        self.total_span = (self.last_seen - self.first_seen)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.active_time = sampling_interval.saturating_mul(
            u32::try_from(self.active_samples).unwrap_or(u32::MAX),
        );
    }

    /// Share of samples in which the process was active
    pub fn active_ratio(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.active_samples as f64 / self.samples as f64
        }
    }
}

/// Group and summarize records. Groups come back in first-seen order.
pub fn aggregate(records: &[ResourceRecord], opts: &StatsOptions) -> Vec<ResourceStats> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<ResourceStats> = Vec::new();

    for record in records {
        let key = record.group_key(opts.group_by_category);
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(ResourceStats::start(key, record));
            groups.len() - 1
        });
        groups[slot].add(record);
    }

    for group in &mut groups {
        group.finish(opts.sampling_interval);
    }
    groups
}

/// Sort in place. Ties are broken by group key so output is deterministic.
pub fn sort_stats(stats: &mut [ResourceStats], order: StatsOrder) {
    match order {
        StatsOrder::CpuAvgDesc => stats.sort_by(|a, b| {
            desc_f64(a.cpu.avg, b.cpu.avg).then_with(|| a.key.cmp(&b.key))
        }),
        StatsOrder::ActiveTimeDesc => stats.sort_by(|a, b| {
            b.active_time
                .cmp(&a.active_time)
                .then_with(|| a.key.cmp(&b.key))
        }),
        StatsOrder::Unsorted => {}
    }
}

/// Aggregate, then sort
pub fn calculate_stats(
    records: &[ResourceRecord],
    opts: &StatsOptions,
    order: StatsOrder,
) -> Vec<ResourceStats> {
    let mut stats = aggregate(records, opts);
    sort_stats(&mut stats, order);
    stats
}

fn desc_f64(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Span of a slice of records, for callers that need it without grouping
pub fn observed_span(records: &[ResourceRecord]) -> Option<TimeDelta> {
    let first = records.iter().map(|r| r.timestamp).min()?;
    let last = records.iter().map(|r| r.timestamp).max()?;
    Some(last - first)
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
