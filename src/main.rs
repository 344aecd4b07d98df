mod cancel;
mod config;
mod error;
mod logging;
mod progress;
mod resource;
mod runner;
mod station;
mod trace;
mod types;
mod worker;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DelayWindow, StationConfig, Timing};

#[derive(Parser, Debug)]
#[command(
    name = "assembly_station",
    about = "Ring of workers sharing tools with their neighbours, free of deadlock",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Trace every phase transition on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Demo settings used when no subcommand is given.
    #[command(flatten)]
    demo: DemoArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the station for a while and print the final counters (default).
    Demo(DemoArgs),
    /// One timed run with CSV output.
    Bench {
        #[arg(long, default_value_t = config::DEFAULT_WORKERS)]
        workers: usize,
        #[arg(long, default_value_t = 2_000)]
        duration_ms: u64,
        /// Record and check the acquisition order.
        #[arg(long)]
        validate: bool,
        #[command(flatten)]
        timing: TimingArgs,
    },
    /// Sweep ring sizes with CSV output.
    Stress {
        #[arg(long, value_delimiter = ',', default_values_t = [2usize, 3, 5, 8, 12])]
        worker_sets: Vec<usize>,
        #[arg(long, default_value_t = 1_000)]
        duration_ms: u64,
        #[arg(long)]
        validate: bool,
        #[command(flatten)]
        timing: TimingArgs,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct DemoArgs {
    #[arg(long, default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,
    #[arg(long, default_value_t = 30_000)]
    duration_ms: u64,
    /// Mark workers stalled after this many ms without finishing a unit.
    #[arg(long)]
    stall_timeout_ms: Option<u64>,
    /// Audit the acquisition order of every worker.
    #[arg(long)]
    validate: bool,
    #[command(flatten)]
    timing: TimingArgs,
}

impl DemoArgs {
    fn station_config(&self) -> StationConfig {
        let config = self.timing.station_config(self.workers);
        match self.stall_timeout_ms {
            Some(ms) => config.with_stall_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct TimingArgs {
    /// Length of one time unit in microseconds.
    #[arg(long, default_value_t = config::DEFAULT_TIME_UNIT.as_micros() as u64)]
    time_unit_us: u64,
    #[arg(long, default_value_t = config::DEFAULT_PREPARE.min)]
    prepare_min: u64,
    #[arg(long, default_value_t = config::DEFAULT_PREPARE.max)]
    prepare_max: u64,
    #[arg(long, default_value_t = config::DEFAULT_WORK.min)]
    work_min: u64,
    #[arg(long, default_value_t = config::DEFAULT_WORK.max)]
    work_max: u64,
    /// Pause between taking the first and second resource, in time units.
    #[arg(long, default_value_t = config::DEFAULT_HANDOFF_UNITS)]
    handoff: u64,
    /// Seed for reproducible timing jitter.
    #[arg(long)]
    seed: Option<u64>,
}

impl TimingArgs {
    fn station_config(&self, workers: usize) -> StationConfig {
        let config = StationConfig::default()
            .with_workers(workers)
            .with_timing(Timing {
                time_unit: Duration::from_micros(self.time_unit_us),
                prepare: DelayWindow::new(self.prepare_min, self.prepare_max),
                work: DelayWindow::new(self.work_min, self.work_max),
                handoff_units: self.handoff,
            });
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command.unwrap_or(Command::Demo(cli.demo)) {
        Command::Demo(demo) => {
            runner::run_demo(
                demo.station_config(),
                Duration::from_millis(demo.duration_ms),
                demo.validate,
            )?;
        }
        Command::Bench {
            workers,
            duration_ms,
            validate,
            timing,
        } => {
            runner::run_benchmark(
                timing.station_config(workers),
                Duration::from_millis(duration_ms),
                validate,
            )?;
        }
        Command::Stress {
            worker_sets,
            duration_ms,
            validate,
            timing,
        } => {
            runner::run_stress(
                timing.station_config(config::DEFAULT_WORKERS),
                &worker_sets,
                Duration::from_millis(duration_ms),
                validate,
            )?;
        }
    }
    Ok(())
}
