//! Batch runner for streplay.
//!
//! Loads a [`ReplayConfig`] from YAML, applies command-line overrides, runs
//! the replay through the engine's batch [`Driver`], and writes the end-of-run
//! report as text and JSON.
//!
//! ```no_run
//! use std::path::Path;
//! use streplay_runner::{load_config, run_replay, write_report};
//!
//! let config = load_config(Path::new("replay.yaml"))?;
//! let report = run_replay(&config)?;
//! write_report(&report, &config.output_dir)?;
//! # Ok::<(), streplay_runner::RunnerError>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub use streplay_engine::{
    CacheModel, Driver, Engine, LocalAccessPolicy, ReplayConfig, ReplayError, Report, StopReason,
};

/// Name of the text report in the output directory.
pub const REPORT_TEXT_FILE: &str = "report.txt";

/// Name of the JSON report in the output directory.
pub const REPORT_JSON_FILE: &str = "report.json";

/// Errors that can occur while running a replay.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Read a YAML configuration file. Omitted fields keep their defaults.
pub fn load_config(path: &Path) -> Result<ReplayConfig> {
    let text = fs::read_to_string(path)?;
    parse_config(&text).map_err(|source| RunnerError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a YAML configuration document.
pub fn parse_config(text: &str) -> std::result::Result<ReplayConfig, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(ReplayConfig::default());
    }
    serde_yaml::from_str(text)
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub event_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub num_cores: Option<u32>,
    pub num_threads: Option<u32>,
    pub deadlock_threshold: Option<u64>,
    pub wake_frequency: Option<u64>,
    pub max_events: Option<u64>,
    pub window_low_water: Option<usize>,
    pub window_high_water: Option<usize>,
    pub cpi_iops: Option<f64>,
    pub cpi_flops: Option<f64>,
    pub max_request_size: Option<u32>,
    pub local_access: Option<LocalAccessPolicy>,
    pub cache_model: Option<CacheModel>,
    pub l1_hit_cycles: Option<u64>,
    pub l1_miss_rate: Option<f64>,
    pub l2_hit_cycles: Option<u64>,
    pub l2_miss_rate: Option<f64>,
    pub l2_miss_penalty: Option<u64>,
    pub cache_line_size: Option<u64>,
    pub rtt_bin_width: Option<u64>,
    pub rtt_bins: Option<usize>,
    pub memory_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl ConfigOverrides {
    /// Apply every override that is set.
    pub fn apply(&self, config: &mut ReplayConfig) {
        if let Some(dir) = &self.event_dir {
            config.event_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(n) = self.num_cores {
            config.num_cores = n;
        }
        if let Some(n) = self.num_threads {
            config.num_threads = n;
        }
        if let Some(t) = self.deadlock_threshold {
            config.deadlock_threshold = t;
        }
        if let Some(w) = self.wake_frequency {
            config.wake_frequency = w;
        }
        if self.max_events.is_some() {
            config.max_events = self.max_events;
        }
        if let Some(n) = self.window_low_water {
            config.window_low_water = n;
        }
        if let Some(n) = self.window_high_water {
            config.window_high_water = n;
        }
        if let Some(cpi) = self.cpi_iops {
            config.cpi_iops = cpi;
        }
        if let Some(cpi) = self.cpi_flops {
            config.cpi_flops = cpi;
        }
        if let Some(size) = self.max_request_size {
            config.max_request_size = size;
        }
        if let Some(policy) = self.local_access {
            config.local_access = policy;
        }
        if let Some(model) = self.cache_model {
            config.cache.model = model;
        }
        if let Some(c) = self.l1_hit_cycles {
            config.cache.l1_hit_cycles = c;
        }
        if let Some(rate) = self.l1_miss_rate {
            config.cache.l1_miss_rate = rate;
        }
        if let Some(c) = self.l2_hit_cycles {
            config.cache.l2_hit_cycles = c;
        }
        if let Some(rate) = self.l2_miss_rate {
            config.cache.l2_miss_rate = rate;
        }
        if let Some(c) = self.l2_miss_penalty {
            config.cache.l2_miss_penalty = c;
        }
        if let Some(size) = self.cache_line_size {
            config.cache.line_size = size;
        }
        if let Some(width) = self.rtt_bin_width {
            config.rtt_bin_width = width;
        }
        if let Some(n) = self.rtt_bins {
            config.rtt_bins = n;
        }
        if let Some(latency) = self.memory_latency {
            config.memory_latency = latency;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
    }
}

/// Validate `config`, replay its traces, and return the report.
pub fn run_replay(config: &ReplayConfig) -> Result<Report> {
    config.validate()?;
    info!(
        event_dir = %config.event_dir.display(),
        threads = config.num_threads,
        cores = config.num_cores,
        "Starting replay"
    );
    let mut driver = Driver::from_config(config)?;
    Ok(driver.run()?)
}

/// Write `report.txt` and `report.json` into `dir`, creating it if needed.
pub fn write_report(report: &Report, dir: &Path) -> Result<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir)?;
    let text_path = dir.join(REPORT_TEXT_FILE);
    let json_path = dir.join(REPORT_JSON_FILE);
    fs::write(&text_path, report.to_string())?;
    fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
    info!(text = %text_path.display(), json = %json_path.display(), "Report written");
    Ok((text_path, json_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_config() {
        let config = parse_config(
            "num_cores: 4\nnum_threads: 8\nlocal_access: estimate\ncache:\n  l1_miss_rate: 0.25\n  model: sampled\n",
        )
        .unwrap();
        assert_eq!(config.num_cores, 4);
        assert_eq!(config.num_threads, 8);
        assert_eq!(config.local_access, LocalAccessPolicy::Estimate);
        assert_eq!(config.cache.l1_miss_rate, 0.25);
        assert_eq!(config.cache.model, CacheModel::Sampled);
        assert_eq!(config.cache.l2_hit_cycles, 10, "unset nested fields keep defaults");
        assert_eq!(config.window_high_water, 1000);
    }

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(parse_config("  \n").unwrap(), ReplayConfig::default());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(parse_config("local_access: sometimes\n").is_err());
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = parse_config("num_cores: 4\nseed: 1\n").unwrap();
        let overrides = ConfigOverrides {
            num_cores: Some(2),
            local_access: Some(LocalAccessPolicy::Skip),
            max_events: Some(10),
            cpi_flops: Some(4.0),
            window_high_water: Some(64),
            l1_miss_rate: Some(1.0),
            l2_miss_penalty: Some(10_000),
            cache_line_size: Some(128),
            rtt_bins: Some(8),
            ..ConfigOverrides::default()
        };
        overrides.apply(&mut config);
        assert_eq!(config.num_cores, 2);
        assert_eq!(config.cpi_flops, 4.0);
        assert_eq!(config.window_high_water, 64);
        assert_eq!(config.cache.l1_miss_rate, 1.0);
        assert_eq!(config.cache.l2_miss_penalty, 10_000);
        assert_eq!(config.cache.line_size, 128);
        assert_eq!(config.rtt_bins, 8);
        assert_eq!(config.cache.l2_hit_cycles, 10, "unset cache override keeps the default");
        assert_eq!(config.seed, 1, "unset override leaves the file value");
        assert_eq!(config.local_access, LocalAccessPolicy::Skip);
        assert_eq!(config.max_events, Some(10));
    }
}
