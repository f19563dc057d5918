//! Simulated environment with a hand-driven clock.
//!
//! Time only moves when a test calls [`SimEnv::advance`], so timestamps the
//! relay stamps on messages are exact and reproducible.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use parley_core::Environment;

/// Default wall clock origin: 2023-11-14T22:13:20Z.
pub const DEFAULT_EPOCH_SECS: u64 = 1_700_000_000;

#[derive(Debug)]
struct Clock {
    elapsed: Duration,
    epoch_secs: u64,
}

/// Simulated environment. Clones share one clock.
#[derive(Debug, Clone)]
pub struct SimEnv {
    clock: Arc<Mutex<Clock>>,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Create an environment whose wall clock starts at
    /// [`DEFAULT_EPOCH_SECS`].
    pub fn new() -> Self {
        Self::with_epoch(DEFAULT_EPOCH_SECS)
    }

    /// Create an environment whose wall clock starts at `epoch_secs`.
    pub fn with_epoch(epoch_secs: u64) -> Self {
        Self { clock: Arc::new(Mutex::new(Clock { elapsed: Duration::ZERO, epoch_secs })) }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.elapsed += by;
    }

    /// Virtual time elapsed since the environment was created.
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner).elapsed
    }
}

impl Environment for SimEnv {
    fn wall_clock_secs(&self) -> u64 {
        let clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        clock.epoch_secs + clock.elapsed.as_secs()
    }
}
