// SPDX-License-Identifier: MIT

mod statemap;

pub use statemap::ClusterStateMap;

use core::sync::atomic::{AtomicBool, Ordering};

/// Whether findings are repaired in place or only counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    ReportOnly,
    Fix,
}

impl CheckMode {
    #[inline]
    pub fn fixing(self) -> bool {
        self == CheckMode::Fix
    }
}

/// Wait policy for the process-wide check-disk session lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Suspend until the lock is free.
    #[default]
    Wait,
    /// Fail immediately when another invocation is in flight.
    NoWait,
}

static CHECK_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Guard serializing entire check-disk invocations. At most one is in flight
/// per process; dropped on every exit path.
#[derive(Debug)]
pub struct SessionGuard {
    _priv: (),
}

impl SessionGuard {
    pub fn acquire(wait: WaitMode) -> Option<Self> {
        loop {
            if CHECK_IN_PROGRESS
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(Self { _priv: () });
            }
            match wait {
                WaitMode::NoWait => return None,
                WaitMode::Wait => {
                    #[cfg(feature = "std")]
                    std::thread::yield_now();
                    #[cfg(not(feature = "std"))]
                    core::hint::spin_loop();
                }
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        CHECK_IN_PROGRESS.store(false, Ordering::Release);
    }
}
