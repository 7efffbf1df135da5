//! Controller configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration priority (highest wins)
//!
//! 1. Builder setters
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`config::defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use flowgate_runtime::config::ControllerConfig;
//!
//! let config = ControllerConfig::from_env()
//!     .num_workers(8)
//!     .max_queue_size(256);
//! config.validate()?;
//! ```

pub mod defaults;

use std::time::Duration;

use flowgate_core::constants::MAX_WORKERS;
use flowgate_core::env::{env_get, env_get_ms, env_get_opt};
use flowgate_core::error::ConfigError;

use crate::affinity::CoreSet;

/// Compute pool, blocking pool and reaper settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of compute worker threads
    pub num_workers: usize,
    /// Number of work queues (workers are spread across them)
    pub num_queues: usize,
    /// Capacity of each work queue
    pub max_queue_size: usize,
    /// Percent of an exchange's timeout reserved for queue wait
    pub queue_timeout_percent: u8,
    /// Cores the compute workers are pinned to (None = no pinning)
    pub compute_cores: Option<CoreSet>,
    /// Number of blocking-pool threads (0 = BLOCK steps run inline)
    pub blocking_threads: usize,
    /// Capacity of the blocking-pool queue
    pub blocking_queue_size: usize,
    /// Cores the blocking threads are pinned to
    pub blocking_cores: Option<CoreSet>,
    /// Spins before an idle worker parks
    pub idle_spins: u32,
    /// Worker park timeout
    pub park_timeout: Duration,
    /// Reaper tick interval
    pub reaper_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ControllerConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FLOWGATE_WORKERS` - Compute worker threads
    /// - `FLOWGATE_QUEUES` - Number of work queues
    /// - `FLOWGATE_MAX_QUEUE_SIZE` - Capacity per work queue
    /// - `FLOWGATE_QUEUE_TIMEOUT_PERCENT` - Queue share of the timeout (1-100)
    /// - `FLOWGATE_COMPUTE_CORES` - Core set for compute workers, e.g. `1-3`
    /// - `FLOWGATE_BLOCKING_THREADS` - Blocking-pool threads
    /// - `FLOWGATE_BLOCKING_QUEUE_SIZE` - Blocking-pool queue capacity
    /// - `FLOWGATE_BLOCKING_CORES` - Core set for blocking threads
    /// - `FLOWGATE_IDLE_SPINS` - Spins before parking
    /// - `FLOWGATE_PARK_TIMEOUT_MS` - Park timeout in milliseconds
    /// - `FLOWGATE_REAPER_INTERVAL_MS` - Reaper tick in milliseconds
    ///
    /// A core set that fails to parse is ignored here and reported by
    /// `CoreSet::from_str` when set explicitly.
    pub fn from_env() -> Self {
        Self {
            num_workers: env_get("FLOWGATE_WORKERS", defaults::num_workers()),
            num_queues: env_get("FLOWGATE_QUEUES", defaults::NUM_QUEUES),
            max_queue_size: env_get("FLOWGATE_MAX_QUEUE_SIZE", defaults::MAX_QUEUE_SIZE),
            queue_timeout_percent: env_get(
                "FLOWGATE_QUEUE_TIMEOUT_PERCENT",
                defaults::QUEUE_TIMEOUT_PERCENT,
            ),
            compute_cores: env_get_opt("FLOWGATE_COMPUTE_CORES"),
            blocking_threads: env_get("FLOWGATE_BLOCKING_THREADS", defaults::BLOCKING_THREADS),
            blocking_queue_size: env_get(
                "FLOWGATE_BLOCKING_QUEUE_SIZE",
                defaults::BLOCKING_QUEUE_SIZE,
            ),
            blocking_cores: env_get_opt("FLOWGATE_BLOCKING_CORES"),
            idle_spins: env_get("FLOWGATE_IDLE_SPINS", defaults::IDLE_SPINS),
            park_timeout: env_get_ms("FLOWGATE_PARK_TIMEOUT_MS", defaults::PARK_TIMEOUT_MS),
            reaper_interval: env_get_ms(
                "FLOWGATE_REAPER_INTERVAL_MS",
                defaults::REAPER_INTERVAL_MS,
            ),
        }
    }

    /// Library defaults only, no environment lookups.
    /// Useful for tests.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::num_workers(),
            num_queues: defaults::NUM_QUEUES,
            max_queue_size: defaults::MAX_QUEUE_SIZE,
            queue_timeout_percent: defaults::QUEUE_TIMEOUT_PERCENT,
            compute_cores: None,
            blocking_threads: defaults::BLOCKING_THREADS,
            blocking_queue_size: defaults::BLOCKING_QUEUE_SIZE,
            blocking_cores: None,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            reaper_interval: Duration::from_millis(defaults::REAPER_INTERVAL_MS),
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn num_queues(mut self, n: usize) -> Self {
        self.num_queues = n;
        self
    }

    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    pub fn queue_timeout_percent(mut self, pct: u8) -> Self {
        self.queue_timeout_percent = pct;
        self
    }

    pub fn compute_cores(mut self, cores: Option<CoreSet>) -> Self {
        self.compute_cores = cores;
        self
    }

    pub fn blocking_threads(mut self, n: usize) -> Self {
        self.blocking_threads = n;
        self
    }

    pub fn blocking_queue_size(mut self, n: usize) -> Self {
        self.blocking_queue_size = n;
        self
    }

    pub fn blocking_cores(mut self, cores: Option<CoreSet>) -> Self {
        self.blocking_cores = cores;
        self
    }

    pub fn idle_spins(mut self, n: u32) -> Self {
        self.idle_spins = n;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn reaper_interval(mut self, d: Duration) -> Self {
        self.reaper_interval = d;
        self
    }

    /// Portion of `total` an exchange may spend waiting in a work queue
    pub fn queue_budget(&self, total: Duration) -> Duration {
        total * u32::from(self.queue_timeout_percent) / 100
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.num_workers > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers {
                requested: self.num_workers,
                max: MAX_WORKERS,
            });
        }
        if self.num_queues == 0 || self.num_queues > self.num_workers {
            return Err(ConfigError::InvalidQueueCount);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.queue_timeout_percent == 0 || self.queue_timeout_percent > 100 {
            return Err(ConfigError::QueueTimeoutPercent(self.queue_timeout_percent));
        }
        if self.blocking_threads > 0 && self.blocking_queue_size == 0 {
            return Err(ConfigError::ZeroBlockingQueueSize);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ControllerConfig::new();
        assert!(config.validate().is_ok());
        assert!(config.num_workers >= 1);
    }

    #[test]
    fn test_invalid_settings() {
        let base = ControllerConfig::new().num_workers(2);

        assert!(matches!(base.clone().num_workers(0).validate(), Err(ConfigError::ZeroWorkers)));
        assert!(matches!(
            base.clone().num_workers(MAX_WORKERS + 1).validate(),
            Err(ConfigError::TooManyWorkers { .. })
        ));
        assert!(matches!(base.clone().num_queues(3).validate(), Err(ConfigError::InvalidQueueCount)));
        assert!(matches!(base.clone().max_queue_size(0).validate(), Err(ConfigError::ZeroQueueSize)));
        assert!(matches!(
            base.clone().queue_timeout_percent(0).validate(),
            Err(ConfigError::QueueTimeoutPercent(0))
        ));
        assert!(matches!(
            base.clone().queue_timeout_percent(101).validate(),
            Err(ConfigError::QueueTimeoutPercent(101))
        ));
        assert!(base.clone().blocking_threads(0).blocking_queue_size(0).validate().is_ok());
        assert!(matches!(
            base.blocking_threads(1).blocking_queue_size(0).validate(),
            Err(ConfigError::ZeroBlockingQueueSize)
        ));
    }

    #[test]
    fn test_queue_budget() {
        let config = ControllerConfig::new().queue_timeout_percent(25);
        assert_eq!(config.queue_budget(Duration::from_millis(200)), Duration::from_millis(50));

        let config = config.queue_timeout_percent(100);
        assert_eq!(config.queue_budget(Duration::from_millis(200)), Duration::from_millis(200));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("FLOWGATE_MAX_QUEUE_SIZE", "77");
        std::env::set_var("FLOWGATE_COMPUTE_CORES", "0-1");
        let config = ControllerConfig::from_env();
        assert_eq!(config.max_queue_size, 77);
        assert_eq!(config.compute_cores.map(|c| c.cores().to_vec()), Some(vec![0, 1]));
        std::env::remove_var("FLOWGATE_MAX_QUEUE_SIZE");
        std::env::remove_var("FLOWGATE_COMPUTE_CORES");
    }
}
