//! Thread-local role of the current OS thread
//!
//! The engine uses the role to decide whether a step runs inline or is
//! handed to a pool: compute workers chain COMPUTE/BLOCK steps, blocking
//! threads chain BLOCK steps, everything else hands off.

use std::cell::Cell;

/// What kind of thread is executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    /// Not owned by flowgate (transport I/O threads, callback threads, tests)
    External,
    /// Compute worker with its index
    Compute(usize),
    /// Blocking-pool thread with its index
    Blocking(usize),
    /// Deadline reaper
    Reaper,
}

impl ThreadRole {
    #[inline]
    pub fn is_compute(&self) -> bool {
        matches!(self, ThreadRole::Compute(_))
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ThreadRole::Blocking(_))
    }
}

thread_local! {
    static ROLE: Cell<ThreadRole> = const { Cell::new(ThreadRole::External) };
}

/// Set the role of the current thread
#[inline]
pub fn set_role(role: ThreadRole) {
    ROLE.with(|cell| cell.set(role));
}

/// Role of the current thread
#[inline]
pub fn current_role() -> ThreadRole {
    ROLE.with(|cell| cell.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_is_per_thread() {
        set_role(ThreadRole::Compute(3));
        assert_eq!(current_role(), ThreadRole::Compute(3));

        let other = std::thread::spawn(current_role).join().unwrap();
        assert_eq!(other, ThreadRole::External);

        set_role(ThreadRole::External);
    }
}
