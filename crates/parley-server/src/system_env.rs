//! Production Environment implementation using system time.

use std::time::{SystemTime, UNIX_EPOCH};

use parley_core::Environment;

/// Production environment reading the system wall clock.
///
/// A system clock set before the Unix epoch reads as zero.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn wall_clock_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
    }
}
