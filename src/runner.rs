//! Demo, benchmark, and stress-test drivers for the station.

use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::config::StationConfig;
use crate::error::Result;
use crate::station::{Station, StationReport};

// How often the demo logs running counters.
const PROGRESS_INTERVAL_MS: u64 = 1_000;

const CSV_HEADER: &str = concat!(
    "workers,duration_ms,total_units,throughput_units_per_s,min_units,max_units,",
    "stop_latency_ms,cpu_user_s,cpu_sys_s,peak_holders,exclusion_violation,",
    "ordering_violation,leaked_resources"
);

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: `rusage` is plain old data, so an all-zero value is valid.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Aggregated numbers from a single timed run.
struct BenchResult {
    workers: usize,
    duration_ms: u64,
    elapsed_ms: f64,
    stop_latency_ms: f64,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
    report: StationReport,
}

impl BenchResult {
    fn throughput(&self) -> f64 {
        if self.elapsed_ms > 0.0 {
            self.report.total_units as f64 / (self.elapsed_ms / 1000.0)
        } else {
            0.0
        }
    }

    fn ordering_violation(&self) -> bool {
        self.report
            .ordering_violations
            .as_ref()
            .is_some_and(|offenders| !offenders.is_empty())
    }

    fn csv_row(&self) -> String {
        let units = self.report.workers.iter().map(|w| w.completed_units);
        let min_units = units.clone().min().unwrap_or(0);
        let max_units = units.max().unwrap_or(0);
        let cpu_user = self
            .cpu_user_s
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "NA".to_string());
        let cpu_sys = self
            .cpu_sys_s
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "NA".to_string());
        format!(
            "{},{},{},{:.2},{},{},{:.2},{},{},{},{},{},{}",
            self.workers,
            self.duration_ms,
            self.report.total_units,
            self.throughput(),
            min_units,
            max_units,
            self.stop_latency_ms,
            cpu_user,
            cpu_sys,
            self.report.peak_holders,
            self.report.exclusion_violation,
            self.ordering_violation(),
            self.report.leaked_resources.len()
        )
    }

    fn print_violations(&self) {
        if self.report.exclusion_violation {
            eprintln!("# violation,mutual_exclusion");
        }
        if self.ordering_violation() {
            eprintln!("# violation,acquisition_order");
        }
        if !self.report.leaked_resources.is_empty() {
            eprintln!("# violation,leaked_resources");
        }
    }
}

fn benchmark_once(config: StationConfig, duration: Duration) -> Result<BenchResult> {
    let workers = config.workers;
    let mut station = Station::new(config)?;
    let cpu_start = cpu_times_seconds();
    station.start()?;
    thread::sleep(duration);

    let stop_begin = Instant::now();
    let report = station.stop()?;
    let stop_latency_ms = stop_begin.elapsed().as_secs_f64() * 1000.0;

    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };

    Ok(BenchResult {
        workers,
        duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        elapsed_ms: report.elapsed.as_secs_f64() * 1000.0,
        stop_latency_ms,
        cpu_user_s,
        cpu_sys_s,
        report,
    })
}

/// Run the station for `duration`, stop it, and print the summary.
pub fn run_demo(config: StationConfig, duration: Duration, validate: bool) -> Result<()> {
    let mut station = Station::new(config.with_audit(validate))?;
    info!(
        workers = station.workers().len(),
        max_cycle = ?station.config().timing.max_cycle(),
        "demo start"
    );
    station.start()?;
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(PROGRESS_INTERVAL_MS)));
        info!(units = ?station.unit_counts(), "progress");
    }
    let report = station.stop()?;
    info!(elapsed = ?report.elapsed, "demo finished");

    println!("STATION SUMMARY");
    println!("workers={}", report.workers.len());
    for stats in &report.workers {
        println!("worker_{}_units={}", stats.id, stats.completed_units);
    }
    println!("total_units={}", report.total_units);
    let states: Vec<String> = report
        .workers
        .iter()
        .map(|w| w.state.to_string())
        .collect();
    println!("worker_states={states:?}");
    println!("leaked_resources={:?}", report.leaked_resources);
    println!("peak_holders={}", report.peak_holders);
    println!("exclusion_violation={}", report.exclusion_violation);
    match &report.ordering_violations {
        Some(offenders) => println!("ordering_violation={}", !offenders.is_empty()),
        None => println!("ordering_violation=unchecked"),
    }
    println!("stalled_workers={:?}", report.stalled_workers);
    Ok(())
}

/// Run one timed benchmark and print a CSV row.
pub fn run_benchmark(config: StationConfig, duration: Duration, validate: bool) -> Result<()> {
    let result = benchmark_once(config.with_audit(validate), duration)?;
    println!("{CSV_HEADER}");
    println!("{}", result.csv_row());
    if validate {
        result.print_violations();
    }
    Ok(())
}

/// Sweep several ring sizes and print one CSV row per size.
pub fn run_stress(
    base: StationConfig,
    worker_sets: &[usize],
    duration: Duration,
    validate: bool,
) -> Result<()> {
    println!("{CSV_HEADER}");
    for &workers in worker_sets {
        let config = base.clone().with_workers(workers).with_audit(validate);
        let result = benchmark_once(config, duration)?;
        println!("{}", result.csv_row());
        if validate {
            result.print_violations();
        }
    }
    Ok(())
}
