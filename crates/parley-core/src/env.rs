//! Environment abstraction for deterministic testing.
//!
//! Decouples relay-generated timestamps from the system clock. Production
//! reads real time; the test harness substitutes a clock it advances by hand
//! so timestamps in assertions are exact.
//!
//! Timeouts and connection ages run on the tokio clock instead, which tests
//! control with `start_paused`.

/// Abstract environment providing user-visible time.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Seconds since the Unix epoch.
    ///
    /// Used for user-visible timestamps (chat `sent_at`), never for ordering
    /// or timeouts.
    fn wall_clock_secs(&self) -> u64;
}
