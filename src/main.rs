//! procwatch - Per-Process Resource History Store
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use procwatch::config::{CliArgs, Command, StatsOrderArg, StorageConfig};
use procwatch::pipeline::BackgroundWriter;
use procwatch::progress::{
    print_info, print_ingest_summary, print_records, print_stats, ProgressReporter,
};
use procwatch::record::{decode, TIMESTAMP_FORMAT};
use procwatch::stats::{StatsOptions, StatsOrder};
use procwatch::storage::{open_storage, Storage};
use procwatch::system::SystemInfo;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Records sent to the writer thread per message
const INGEST_BATCH: usize = 256;

/// Writer channel depth, in messages
const CHANNEL_SIZE: usize = 64;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    setup_logging(args.verbose, args.quiet)?;

    // Validate before anything touches the disk
    let config = StorageConfig::from_args(&args).context("Invalid configuration")?;

    let storage: Arc<dyn Storage> = Arc::from(
        open_storage(&config).context("Failed to create storage")?,
    );
    storage
        .initialize()
        .context("Failed to initialize storage")?;

    match args.command {
        Command::Ingest { ref input, derive } => {
            run_ingest(storage, &config, input.as_deref(), derive, args.quiet)
        }
        Command::Read {
            ref since,
            ref until,
            limit,
        } => {
            let records = match (since, until) {
                (None, None) => storage.read_records(limit)?,
                _ => {
                    let start = match since {
                        Some(s) => parse_time(s)?,
                        None => far_past(),
                    };
                    let end = match until {
                        Some(s) => parse_time(s)?,
                        None => far_future(),
                    };
                    let mut records = storage
                        .read_records_by_time_range(start, end)
                        .context("Range query failed")?;
                    // Newest first: keep the latest N, then show oldest first
                    if let Some(n) = limit {
                        records.truncate(n);
                    }
                    records.reverse();
                    records
                }
            };
            print_records(&records);
            storage.close()?;
            Ok(())
        }
        Command::Stats {
            by_category,
            order,
            top,
        } => {
            let records = storage.read_records(None).context("Read failed")?;
            let opts = StatsOptions {
                group_by_category: by_category,
                sampling_interval: config.sampling_interval(),
            };
            let order = match order {
                StatsOrderArg::Cpu => StatsOrder::CpuAvgDesc,
                StatsOrderArg::Active => StatsOrder::ActiveTimeDesc,
            };
            let stats = storage.calculate_stats(&records, &opts, order);
            print_stats(&stats, top);
            storage.close()?;
            Ok(())
        }
        Command::Info => {
            let info = storage.storage_info().context("Failed to read storage info")?;
            print_info(&info);
            storage.close()?;
            Ok(())
        }
        Command::Clean { keep_days } => {
            let removed = storage
                .clean_old_data(keep_days)
                .context("Cleanup failed")?;
            println!("Removed {} (older than {} days)", removed, keep_days);
            storage.close()?;
            Ok(())
        }
    }
}

/// Decode lines from a file or stdin and store them through a background
/// writer. Ctrl-C stops reading; everything already read is still saved.
fn run_ingest(
    storage: Arc<dyn Storage>,
    config: &StorageConfig,
    input: Option<&Path>,
    derive: bool,
    quiet: bool,
) -> Result<()> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Cannot open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    // Setup signal handler for graceful shutdown
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, flushing...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let writer = BackgroundWriter::new(
        Arc::clone(&storage),
        CHANNEL_SIZE,
        config.buffer_size,
        config.flush_interval(),
    )
    .context("Failed to start writer")?;
    let handle = writer.handle();

    let progress = (!quiet).then(ProgressReporter::new);
    let totals = derive.then(|| SystemInfo::global().get());

    let started = Instant::now();
    let (mut lines, mut records, mut skipped) = (0u64, 0u64, 0u64);
    let mut batch = Vec::with_capacity(INGEST_BATCH);

    for line in reader.lines() {
        if shutdown.load(Ordering::SeqCst) {
            info!("Ingest interrupted after {} lines", lines);
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Input read stopped: {}", e);
                break;
            }
        };
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        lines += 1;

        match decode(line) {
            Ok((mut record, version)) => {
                if let Some(totals) = &totals {
                    totals.fill_derived(&mut record);
                }
                debug!(version = %version, name = %record.name, "decoded");
                batch.push(record);
                records += 1;
            }
            Err(e) => {
                debug!("Skipping line {}: {}", lines, e);
                skipped += 1;
            }
        }

        if batch.len() >= INGEST_BATCH {
            handle.send_records(std::mem::take(&mut batch))?;
        }
        if lines % 1000 == 0 {
            if let Some(p) = &progress {
                p.update(lines, records, skipped);
            }
        }
    }

    handle.send_records(batch)?;
    if let Some(p) = &progress {
        p.set_status("Flushing...");
    }
    writer.finish().context("Failed to finish writing")?;

    let destination = storage
        .storage_info()
        .map(|i| i.path.display().to_string())
        .unwrap_or_default();

    if let Some(p) = &progress {
        p.update(lines, records, skipped);
        p.finish("Ingest complete");
        print_ingest_summary(lines, records, skipped, started.elapsed(), &destination);
    }

    if handle.stats().save_errors() > 0 {
        anyhow::bail!(
            "{} of {} records could not be stored",
            records - handle.stats().records_saved(),
            records
        );
    }
    Ok(())
}

fn parse_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .with_context(|| format!("Invalid time '{}', expected YYYY-MM-DD HH:MM:SS", value))
}

fn far_past() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn far_future() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .unwrap_or_default()
}

fn setup_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("procwatch=debug,warn"),
        Err(_) if quiet => EnvFilter::new("error"),
        Err(_) => EnvFilter::new("warn"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
