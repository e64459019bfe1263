//! Optimizer and metrics configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metrics::{HotspotPolicy, HotspotThreshold, SeverityMultiples};

/// Parses options string, returns map with option names and values.
///
/// # Examples
///
/// ```rust
/// use rackplan::config::parse_options;
///
/// let options = parse_options("thermal=50,weight=something");
/// assert_eq!(options.get("thermal").unwrap(), "50");
/// assert_eq!(options.get("weight").unwrap(), "something");
/// assert_eq!(options.get("power"), None);
/// ```
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

/// Holds raw optimizer config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawOptimizerConfig {
    pub iteration_budget: Option<u64>,
    pub restarts: Option<usize>,
    pub seed: Option<u64>,
    pub threads: Option<usize>,
    pub thermal_smoothing_radius: Option<u32>,
    pub hotspot: Option<RawHotspotPolicy>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
struct RawHotspotPolicy {
    pub threshold: Option<HotspotThreshold>,
    pub multiples: Option<SeverityMultiples>,
}

/// Represents optimizer configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct OptimizerConfig {
    /// Default number of neighbour evaluations a single run may spend.
    pub iteration_budget: u64,
    /// Number of additional hill-climbing runs started from alternative seed layouts.
    pub restarts: usize,
    /// Seed of the generator producing shuffled seed layouts.
    pub seed: u64,
    /// Number of threads evaluating neighbours (1 = evaluate in the calling thread).
    pub threads: usize,
    /// Radius in units of the window used to smooth the thermal profile before scoring.
    pub thermal_smoothing_radius: u32,
    /// Hotspot detection policy used for proposal metrics.
    pub hotspot: HotspotPolicy,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::from_raw(RawOptimizerConfig::default())
    }
}

impl OptimizerConfig {
    /// Creates optimizer config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file(file_name: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(file_name).map_err(|source| ConfigError::Io {
            path: file_name.to_string(),
            source,
        })?;
        Self::from_yaml_str(&data)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        let raw: RawOptimizerConfig = if data.trim().is_empty() {
            RawOptimizerConfig::default()
        } else {
            serde_yaml::from_str(data)?
        };
        let config = Self::from_raw(raw);
        config.validate()?;
        Ok(config)
    }

    fn from_raw(raw: RawOptimizerConfig) -> Self {
        let hotspot = raw.hotspot.unwrap_or_default();
        Self {
            iteration_budget: raw.iteration_budget.unwrap_or(10_000),
            restarts: raw.restarts.unwrap_or(3),
            seed: raw.seed.unwrap_or(123),
            threads: raw.threads.unwrap_or(1),
            thermal_smoothing_radius: raw.thermal_smoothing_radius.unwrap_or(1),
            hotspot: HotspotPolicy {
                threshold: hotspot.threshold.unwrap_or(HotspotThreshold::Percentile(90.)),
                multiples: hotspot.multiples.unwrap_or_default(),
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }
        Ok(self.hotspot.validate()?)
    }

    pub fn with_iteration_budget(mut self, budget: u64) -> Self {
        self.iteration_budget = budget;
        self
    }

    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_hotspot_policy(mut self, policy: HotspotPolicy) -> Self {
        self.hotspot = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OptimizerConfig::from_yaml_str("").unwrap();
        assert_eq!(config, OptimizerConfig::default());
        assert_eq!(config.iteration_budget, 10_000);
        assert_eq!(config.restarts, 3);
        assert_eq!(config.threads, 1);
        assert_eq!(config.hotspot.threshold, HotspotThreshold::Percentile(90.));
        assert_eq!(config.hotspot.multiples.critical, 3.);
    }

    #[test]
    fn test_partial_yaml() {
        let config = OptimizerConfig::from_yaml_str(
            "iteration_budget: 500\nthreads: 4\nhotspot:\n  threshold:\n    absolute: 800\n",
        )
        .unwrap();
        assert_eq!(config.iteration_budget, 500);
        assert_eq!(config.threads, 4);
        assert_eq!(config.seed, 123);
        assert_eq!(config.hotspot.threshold, HotspotThreshold::Absolute(800.));
        assert_eq!(config.hotspot.multiples, SeverityMultiples::default());
    }

    #[test]
    fn test_invalid() {
        assert!(OptimizerConfig::from_yaml_str("threads: 0\n").is_err());
        assert!(OptimizerConfig::from_yaml_str("hotspot:\n  threshold:\n    percentile: 150\n").is_err());
        assert!(OptimizerConfig::from_yaml_str("restarts: many\n").is_err());
    }
}
