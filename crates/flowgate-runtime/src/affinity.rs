//! CPU affinity for flowgate threads
//!
//! Core sets use the familiar `taskset` list syntax: `"0"`, `"1-3"`,
//! `"0,2,4-7"`. A thread pinned to a set may run on any core in it.

use std::fmt;
use std::io;
use std::str::FromStr;

use flowgate_core::error::ConfigError;

/// Highest core index (exclusive) a set may name
pub const MAX_CORES: usize = 1024;

/// Sorted, de-duplicated list of CPU cores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSet {
    cores: Vec<usize>,
}

impl CoreSet {
    /// Set containing a single core
    pub fn single(core: usize) -> Result<Self, ConfigError> {
        check_range(core)?;
        Ok(Self { cores: vec![core] })
    }

    #[inline]
    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    #[inline]
    pub fn contains(&self, core: usize) -> bool {
        self.cores.binary_search(&core).is_ok()
    }
}

fn check_range(core: usize) -> Result<(), ConfigError> {
    if core >= MAX_CORES {
        return Err(ConfigError::CoreOutOfRange {
            core,
            max: MAX_CORES - 1,
        });
    }
    Ok(())
}

impl FromStr for CoreSet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidCoreSet {
            spec: s.to_string(),
            reason,
        };
        let parse = |part: &str| -> Result<usize, ConfigError> {
            let core = part.trim().parse().map_err(|_| invalid("not a core number"))?;
            check_range(core)?;
            Ok(core)
        };

        let mut cores = Vec::new();
        for part in s.split(',') {
            if part.trim().is_empty() {
                return Err(invalid("empty entry"));
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let (lo, hi) = (parse(lo)?, parse(hi)?);
                    if lo > hi {
                        return Err(invalid("range start after end"));
                    }
                    cores.extend(lo..=hi);
                }
                None => cores.push(parse(part)?),
            }
        }
        cores.sort_unstable();
        cores.dedup();
        Ok(Self { cores })
    }
}

impl fmt::Display for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Collapse runs back into ranges
        let mut first = true;
        let mut i = 0;
        while i < self.cores.len() {
            let start = self.cores[i];
            let mut end = start;
            while i + 1 < self.cores.len() && self.cores[i + 1] == end + 1 {
                i += 1;
                end += 1;
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
            i += 1;
        }
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Restrict the calling thread to `set`
        ///
        /// Returns `Ok(true)` when the mask was applied.
        pub fn pin_current_thread(set: &CoreSet) -> io::Result<bool> {
            use nix::sched::{sched_setaffinity, CpuSet};
            use nix::unistd::Pid;

            if set.is_empty() {
                return Ok(false);
            }
            let mut mask = CpuSet::new();
            for &core in set.cores() {
                mask.set(core).map_err(io::Error::from)?;
            }
            sched_setaffinity(Pid::from_raw(0), &mask).map_err(io::Error::from)?;
            Ok(true)
        }
    } else {
        /// Thread affinity is not supported on this platform; always `Ok(false)`
        pub fn pin_current_thread(_set: &CoreSet) -> io::Result<bool> {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let set: CoreSet = "0".parse().unwrap();
        assert_eq!(set.cores(), &[0]);

        let set: CoreSet = "1-3".parse().unwrap();
        assert_eq!(set.cores(), &[1, 2, 3]);

        let set: CoreSet = " 4-7, 0 ,2,3".parse().unwrap();
        assert_eq!(set.cores(), &[0, 2, 3, 4, 5, 6, 7]);
        assert!(set.contains(5));
        assert!(!set.contains(1));
        assert_eq!(set.to_string(), "0,2-7");
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "a", "1,,2", "3-1", "1-"] {
            assert!(
                matches!(bad.parse::<CoreSet>(), Err(ConfigError::InvalidCoreSet { .. })),
                "{bad:?}"
            );
        }
        assert!(matches!(
            "0-1024".parse::<CoreSet>(),
            Err(ConfigError::CoreOutOfRange { core: 1024, .. })
        ));
        assert!(CoreSet::single(MAX_CORES).is_err());
    }

    #[test]
    fn test_pin_empty_set_is_noop() {
        let set = CoreSet { cores: Vec::new() };
        assert!(!pin_current_thread(&set).unwrap());
    }
}
