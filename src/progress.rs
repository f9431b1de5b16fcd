//! Progress reporting and terminal output
//!
//! Provides an ingest spinner using indicatif and the tables printed by the
//! query subcommands.

use crate::record::ResourceRecord;
use crate::stats::ResourceStats;
use crate::storage::StorageInfo;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Spinner shown while ingesting records
pub struct ProgressReporter {
    bar: ProgressBar,
    started: Instant,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// Update the running totals
    pub fn update(&self, lines: u64, records: u64, skipped: u64) {
        let secs = self.started.elapsed().as_secs_f64();
        let rate = if secs > 0.0 { records as f64 / secs } else { 0.0 };

        let mut msg = format!(
            "Lines: {} | Records: {} | Rate: {:.0}/s",
            format_number(lines),
            format_number(records),
            rate,
        );
        if skipped > 0 {
            msg.push_str(&format!(" | Skipped: {}", format_number(skipped)));
        }
        self.bar.set_message(msg);
    }

    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Human-readable span, e.g. `2h 05m`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m", h, m)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Print the ingest summary
pub fn print_ingest_summary(
    lines: u64,
    records: u64,
    skipped: u64,
    duration: Duration,
    destination: &str,
) {
    let secs = duration.as_secs_f64();
    let rate = if secs > 0.0 { records as f64 / secs } else { 0.0 };

    println!();
    println!("{}", style("Ingest Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Lines:").bold(), format_number(lines));
    println!("  {} {}", style("Records:").bold(), format_number(records));
    if skipped > 0 {
        println!(
            "  {} {}",
            style("Skipped:").yellow().bold(),
            format_number(skipped)
        );
    }
    println!(
        "  {} {:.1}s ({:.0} records/sec)",
        style("Duration:").bold(),
        secs,
        rate
    );
    println!("  {} {}", style("Storage:").bold(), destination);
    println!();
}

/// Print storage information
pub fn print_info(info: &StorageInfo) {
    let when = |t: Option<chrono::NaiveDateTime>| {
        t.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
    };

    println!();
    println!(
        "{} {}",
        style("procwatch").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Backend:").bold(), info.backend);
    println!("  {} {}", style("Path:").bold(), info.path.display());
    println!("  {} {}", style("Files:").bold(), info.file_count);
    println!(
        "  {} {}",
        style("Size:").bold(),
        format_size(info.total_size_bytes, BINARY)
    );
    println!(
        "  {} {}",
        style("Records:").bold(),
        format_number(info.total_records)
    );
    println!("  {} {}", style("Oldest:").bold(), when(info.oldest_record));
    println!("  {} {}", style("Newest:").bold(), when(info.newest_record));
    if let Some(modified) = info.last_modified {
        println!(
            "  {} {}",
            style("Modified:").bold(),
            modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
}

/// Print a stats table, at most `top` rows
pub fn print_stats(stats: &[ResourceStats], top: usize) {
    println!(
        "{}",
        style(format!(
            "{:<24} {:>8} {:>8} {:>8} {:>10} {:>10} {:>10} {:>7}",
            "NAME", "SAMPLES", "CPU AVG", "CPU MAX", "MEM AVG", "MEM MAX", "ACTIVE", "ACTIVE%"
        ))
        .bold()
    );
    for s in stats.iter().take(top) {
        println!(
            "{:<24} {:>8} {:>8.2} {:>8.2} {:>10.1} {:>10.1} {:>10} {:>6.1}%",
            truncate(&s.key, 24),
            s.samples,
            s.cpu.avg,
            s.cpu.max,
            s.memory_mb.avg,
            s.memory_mb.max,
            format_duration(s.active_time),
            s.active_ratio() * 100.0,
        );
    }
    if stats.len() > top {
        println!(
            "{}",
            style(format!("... {} more", stats.len() - top)).dim()
        );
    }
}

/// Print records one per line
pub fn print_records(records: &[ResourceRecord]) {
    for r in records {
        let marker = if r.is_active {
            style("*").green()
        } else {
            style(" ").dim()
        };
        println!(
            "{} {} {:<24} pid={:<7} cpu={:>6.2} mem={:>9.1}MB threads={}",
            r.timestamp_string(),
            marker,
            truncate(&r.name, 24),
            r.pid,
            r.cpu_percent,
            r.memory_mb,
            r.threads,
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(7500)), "2h 05m");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
