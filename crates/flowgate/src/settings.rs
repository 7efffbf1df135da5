//! Engine settings
//!
//! Byte and time budgets applied to every request, plus the controller
//! configuration for the worker pools. Same layering as
//! `ControllerConfig`: defaults, then `FLOWGATE_*` environment overrides,
//! then builder setters.

use std::time::Duration;

use flowgate_core::env::{env_get, env_get_ms, env_get_opt};
use flowgate_core::error::ConfigError;
use flowgate_runtime::affinity::CoreSet;
use flowgate_runtime::config::ControllerConfig;

/// Default request body limit (1 MiB)
pub const DEFAULT_REQUEST_SIZE: usize = 1 << 20;

/// Default response body limit (1 MiB)
pub const DEFAULT_RESPONSE_SIZE: usize = 1 << 20;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Largest accepted request body in bytes
    pub request_size: usize,
    /// Capacity of each exchange's response buffer in bytes
    pub response_size: usize,
    /// Total time budget of a request, from ingress
    pub timeout: Duration,
    /// Cores for the transport's I/O threads (applied by the transport)
    pub io_cores: Option<CoreSet>,
    /// Worker pools, queues and reaper
    pub controller: ControllerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Settings {
    /// Defaults with environment overrides
    ///
    /// Reads `FLOWGATE_REQUEST_SIZE`, `FLOWGATE_RESPONSE_SIZE`,
    /// `FLOWGATE_TIMEOUT_MS` and `FLOWGATE_IO_CORES`, plus everything
    /// `ControllerConfig::from_env` reads.
    pub fn from_env() -> Self {
        Self {
            request_size: env_get("FLOWGATE_REQUEST_SIZE", DEFAULT_REQUEST_SIZE),
            response_size: env_get("FLOWGATE_RESPONSE_SIZE", DEFAULT_RESPONSE_SIZE),
            timeout: env_get_ms("FLOWGATE_TIMEOUT_MS", DEFAULT_TIMEOUT_MS),
            io_cores: env_get_opt("FLOWGATE_IO_CORES"),
            controller: ControllerConfig::from_env(),
        }
    }

    /// Defaults only, no environment lookups
    pub fn new() -> Self {
        Self {
            request_size: DEFAULT_REQUEST_SIZE,
            response_size: DEFAULT_RESPONSE_SIZE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            io_cores: None,
            controller: ControllerConfig::new(),
        }
    }

    pub fn request_size(mut self, bytes: usize) -> Self {
        self.request_size = bytes;
        self
    }

    pub fn response_size(mut self, bytes: usize) -> Self {
        self.response_size = bytes;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn io_cores(mut self, cores: Option<CoreSet>) -> Self {
        self.io_cores = cores;
        self
    }

    pub fn controller(mut self, config: ControllerConfig) -> Self {
        self.controller = config;
        self
    }

    /// Adjust the controller configuration in place
    pub fn with_controller<F>(mut self, f: F) -> Self
    where
        F: FnOnce(ControllerConfig) -> ControllerConfig,
    {
        self.controller = f(self.controller);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_size == 0 {
            return Err(ConfigError::ZeroRequestSize);
        }
        if self.response_size == 0 {
            return Err(ConfigError::ZeroResponseSize);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.controller.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Settings::new().validate().is_ok());
        assert!(matches!(
            Settings::new().request_size(0).validate(),
            Err(ConfigError::ZeroRequestSize)
        ));
        assert!(matches!(
            Settings::new().response_size(0).validate(),
            Err(ConfigError::ZeroResponseSize)
        ));
        assert!(matches!(
            Settings::new().timeout(Duration::ZERO).validate(),
            Err(ConfigError::ZeroTimeout)
        ));
        assert!(matches!(
            Settings::new().with_controller(|c| c.num_workers(0)).validate(),
            Err(ConfigError::ZeroWorkers)
        ));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("FLOWGATE_TIMEOUT_MS", "250");
        std::env::set_var("FLOWGATE_IO_CORES", "0");
        let settings = Settings::from_env();
        assert_eq!(settings.timeout, Duration::from_millis(250));
        assert_eq!(settings.io_cores.map(|c| c.len()), Some(1));
        std::env::remove_var("FLOWGATE_TIMEOUT_MS");
        std::env::remove_var("FLOWGATE_IO_CORES");
    }
}
