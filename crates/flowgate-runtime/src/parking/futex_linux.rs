//! Linux futex-based worker parking
//!
//! The futex word is an epoch counter. Parking is `FUTEX_WAIT(word, token)`:
//! the kernel only sleeps if the word still equals the token read in
//! `prepare`. Waking bumps the word before `FUTEX_WAKE`, so a wake that
//! lands between `prepare` and `park` makes the wait fail with `EAGAIN`.

use super::WorkerParking;
use std::sync::atomic::{self, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Linux futex-based parking
pub struct FutexParking {
    /// Futex word: bumped by every wake
    epoch: AtomicU32,

    /// Workers between `prepare` and the end of `park`/`cancel`
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            epoch: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn wake(&self, count: i32) {
        // Pairs with the fence in `prepare`: either we see the parked worker
        // or it sees the work published before this call.
        atomic::fence(Ordering::SeqCst);
        if self.parked.load(Ordering::Relaxed) == 0 {
            return;
        }
        self.epoch.fetch_add(1, Ordering::Release);
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn prepare(&self) -> u32 {
        self.parked.fetch_add(1, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);
        self.epoch.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    fn park(&self, token: u32, timeout: Option<Duration>) -> bool {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.epoch.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                token,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        if result == 0 {
            return self.epoch.load(Ordering::Acquire) != token;
        }
        // EAGAIN: epoch already moved, i.e. a wake raced ahead of us
        let errno = std::io::Error::last_os_error().raw_os_error();
        errno == Some(libc::EAGAIN)
    }

    fn wake_one(&self) {
        self.wake(1);
    }

    fn wake_all(&self) {
        self.wake(i32::MAX);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
