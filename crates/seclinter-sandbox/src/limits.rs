//! Wall-clock and memory budgets for jailed plugin processes.
//!
//! `birdcage` confines what a child may touch but not how long it runs or how
//! much memory it holds. The [`Watchdog`] covers both: the supervisor polls
//! it while waiting on the child and kills the process on the first breach.

use std::time::{Duration, Instant};

use crate::runtime::resident_memory_kib;

const KIB_PER_MIB: u64 = 1024;

/// Budgets applied to a single plugin process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    wall_clock: Duration,
    memory_kib: Option<u64>,
}

impl ResourceLimits {
    /// Creates limits with the given wall-clock budget and no memory cap.
    #[must_use]
    pub const fn new(wall_clock: Duration) -> Self {
        Self {
            wall_clock,
            memory_kib: None,
        }
    }

    /// Caps resident memory at `mib` mebibytes.
    #[must_use]
    pub const fn with_memory_mib(mut self, mib: u64) -> Self {
        self.memory_kib = Some(mib.saturating_mul(KIB_PER_MIB));
        self
    }

    /// Returns the wall-clock budget.
    #[must_use]
    pub const fn wall_clock(&self) -> Duration {
        self.wall_clock
    }

    /// Returns the resident memory cap in KiB, if any.
    #[must_use]
    pub const fn memory_kib(&self) -> Option<u64> {
        self.memory_kib
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::new(Duration::from_secs(5)).with_memory_mib(100)
    }
}

/// A budget the child process exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitBreach {
    /// The process outlived its wall-clock budget.
    WallClock {
        /// Configured budget.
        limit: Duration,
    },
    /// The process held more resident memory than allowed.
    Memory {
        /// Configured cap in KiB.
        limit_kib: u64,
        /// Resident set size observed in KiB.
        observed_kib: u64,
    },
}

/// Tracks elapsed time and memory use for one supervised process.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    limits: ResourceLimits,
    started: Instant,
}

impl Watchdog {
    /// Starts the clock.
    #[must_use]
    pub fn start(limits: ResourceLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Time elapsed since the watchdog started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the wall-clock budget runs out.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.limits.wall_clock.saturating_sub(self.elapsed())
    }

    /// Checks both budgets for the process `pid`.
    ///
    /// Memory is sampled from `/proc`; when the sample cannot be taken (the
    /// process already exited, or the platform has no procfs) only the
    /// wall-clock budget is enforced.
    #[must_use]
    pub fn check(&self, pid: u32) -> Option<LimitBreach> {
        if self.elapsed() >= self.limits.wall_clock {
            return Some(LimitBreach::WallClock {
                limit: self.limits.wall_clock,
            });
        }
        let limit_kib = self.limits.memory_kib?;
        match resident_memory_kib(pid) {
            Ok(Some(observed_kib)) if observed_kib > limit_kib => Some(LimitBreach::Memory {
                limit_kib,
                observed_kib,
            }),
            _ => None,
        }
    }
}
