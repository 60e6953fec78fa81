//! streplay - synchronization-aware trace replay
//!
//! Usage:
//!   streplay --config replay.yaml
//!   streplay --event-dir traces/fft --num-threads 8 --num-cores 4 --output-dir out

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use streplay_runner::{
    load_config, run_replay, write_report, CacheModel, ConfigOverrides, LocalAccessPolicy, ReplayConfig,
};

#[derive(Parser)]
#[command(name = "streplay")]
#[command(about = "Replay multi-threaded execution traces on a simulated many-core machine")]
#[command(version)]
struct Cli {
    /// YAML configuration file; command-line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding sigil.events.out-<tid>[.gz] and sigil.pthread.out
    #[arg(short, long)]
    event_dir: Option<PathBuf>,

    /// Directory for report.txt and report.json
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Number of simulated cores
    #[arg(long)]
    num_cores: Option<u32>,

    /// Number of traced threads
    #[arg(long)]
    num_threads: Option<u32>,

    /// Cycles without progress before declaring deadlock
    #[arg(long)]
    deadlock_threshold: Option<u64>,

    /// Cycles between wakeups of idle cores
    #[arg(long)]
    wake_frequency: Option<u64>,

    /// Stop after this many completed events
    #[arg(long)]
    max_events: Option<u64>,

    /// Refill the event window when it drops below this many events
    #[arg(long)]
    window_low_water: Option<usize>,

    /// Events to hold in the window after a refill
    #[arg(long)]
    window_high_water: Option<usize>,

    /// Cycles per integer operation
    #[arg(long)]
    cpi_iops: Option<f64>,

    /// Cycles per floating-point operation
    #[arg(long)]
    cpi_flops: Option<f64>,

    /// Largest single memory request in bytes
    #[arg(long)]
    max_request_size: Option<u32>,

    /// Treatment of thread-local memory accesses
    #[arg(long, value_enum)]
    local_access: Option<LocalAccessArg>,

    /// Shorthand for --local-access skip
    #[arg(long, conflicts_with = "local_access")]
    skip_local_rw: bool,

    /// Cache model
    #[arg(long, value_enum)]
    cache_model: Option<CacheModelArg>,

    /// L1 hit latency in cycles
    #[arg(long)]
    l1_hit_cycles: Option<u64>,

    /// L1 miss probability
    #[arg(long)]
    l1_miss_rate: Option<f64>,

    /// L2 hit latency in cycles
    #[arg(long)]
    l2_hit_cycles: Option<u64>,

    /// L2 miss probability
    #[arg(long)]
    l2_miss_rate: Option<f64>,

    /// Extra cycles for an L2 miss
    #[arg(long)]
    l2_miss_penalty: Option<u64>,

    /// Cache line size in bytes
    #[arg(long)]
    cache_line_size: Option<u64>,

    /// RTT histogram bin width in cycles
    #[arg(long)]
    rtt_bin_width: Option<u64>,

    /// RTT histogram bin count
    #[arg(long)]
    rtt_bins: Option<usize>,

    /// Latency of the simulated memory subsystem in cycles
    #[arg(long)]
    memory_latency: Option<u64>,

    /// Seed for the sampled cache model
    #[arg(long)]
    seed: Option<u64>,

    /// Print the report to stdout as well
    #[arg(short, long)]
    print: bool,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LocalAccessArg {
    Issue,
    Estimate,
    Skip,
}

impl From<LocalAccessArg> for LocalAccessPolicy {
    fn from(arg: LocalAccessArg) -> Self {
        match arg {
            LocalAccessArg::Issue => LocalAccessPolicy::Issue,
            LocalAccessArg::Estimate => LocalAccessPolicy::Estimate,
            LocalAccessArg::Skip => LocalAccessPolicy::Skip,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CacheModelArg {
    Expected,
    Sampled,
}

impl From<CacheModelArg> for CacheModel {
    fn from(arg: CacheModelArg) -> Self {
        match arg {
            CacheModelArg::Expected => CacheModel::Expected,
            CacheModelArg::Sampled => CacheModel::Sampled,
        }
    }
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let local_access = if self.skip_local_rw {
            Some(LocalAccessPolicy::Skip)
        } else {
            self.local_access.map(Into::into)
        };
        ConfigOverrides {
            event_dir: self.event_dir.clone(),
            output_dir: self.output_dir.clone(),
            num_cores: self.num_cores,
            num_threads: self.num_threads,
            deadlock_threshold: self.deadlock_threshold,
            wake_frequency: self.wake_frequency,
            max_events: self.max_events,
            window_low_water: self.window_low_water,
            window_high_water: self.window_high_water,
            cpi_iops: self.cpi_iops,
            cpi_flops: self.cpi_flops,
            max_request_size: self.max_request_size,
            local_access,
            cache_model: self.cache_model.map(Into::into),
            l1_hit_cycles: self.l1_hit_cycles,
            l1_miss_rate: self.l1_miss_rate,
            l2_hit_cycles: self.l2_hit_cycles,
            l2_miss_rate: self.l2_miss_rate,
            l2_miss_penalty: self.l2_miss_penalty,
            cache_line_size: self.cache_line_size,
            rtt_bin_width: self.rtt_bin_width,
            rtt_bins: self.rtt_bins,
            memory_latency: self.memory_latency,
            seed: self.seed,
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: &Cli) -> streplay_runner::Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ReplayConfig::default(),
    };
    cli.overrides().apply(&mut config);

    let report = run_replay(&config)?;
    write_report(&report, &config.output_dir)?;
    if cli.print {
        print!("{}", report);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    streplay_metrics::describe_metrics();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
