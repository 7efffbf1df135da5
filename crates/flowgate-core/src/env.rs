//! Environment variable utilities
//!
//! Settings are compile-time defaults overridden by `FLOWGATE_*` variables.
//! A variable that is unset or fails to parse falls back to the default.
//!
//! ```ignore
//! use flowgate_core::env::{env_get, env_get_ms};
//!
//! let workers: usize = env_get("FLOWGATE_WORKERS", 4);
//! let timeout = env_get_ms("FLOWGATE_TIMEOUT_MS", 1000);
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as `T`, or return `default`
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as `Some(T)` if set and parseable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get a millisecond count as a `Duration`
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name; the test harness runs them in parallel.

    #[test]
    fn test_unset_returns_default() {
        let val: usize = env_get("__FLOWGATE_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<u32>("__FLOWGATE_TEST_UNSET__").is_none());
        assert_eq!(env_get_ms("__FLOWGATE_TEST_UNSET__", 250), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_with_whitespace() {
        std::env::set_var("__FLOWGATE_TEST_NUM__", " 123 ");
        let val: usize = env_get("__FLOWGATE_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__FLOWGATE_TEST_NUM__");
    }

    #[test]
    fn test_invalid_parse_falls_back() {
        std::env::set_var("__FLOWGATE_TEST_BAD__", "lots");
        let val: u64 = env_get("__FLOWGATE_TEST_BAD__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__FLOWGATE_TEST_BAD__");
    }
}
