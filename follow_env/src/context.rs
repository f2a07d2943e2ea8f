//! Clock/runtime trait for the follow tick driver.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for time and task management.
///
/// Abstracts the "real world" so the tick driver runs unchanged on
/// hardware (tokio) and in simulation (virtual clock).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait FollowContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// Tick timestamps, sensor freshness and target-loss timeouts are all
    /// measured on this clock.
    fn now(&self) -> Duration;

    /// `now()` in seconds.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task (detection / sensor producers).
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (0 when not seeded).
    fn seed(&self) -> u64;
}
