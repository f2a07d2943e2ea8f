//! Latest-value slots and the shutdown signal.
//!
//! ```text
//! detector task ──publish──►┌────────────┐
//!    (~10 Hz)               │ LatestSlot │──latest()──► tick driver (30 Hz)
//!                           └────────────┘
//! sensor task ───publish──►┌────────────┐
//!    (~20 Hz)               │ LatestSlot │──latest()──┘
//!                           └────────────┘
//! ```
//!
//! A slot only ever holds the newest value. Readers never block; staleness
//! is judged from the timestamp carried inside the value.

use crate::error::EnvError;
use tokio::sync::watch;

/// Write side of a latest-value slot.
#[derive(Debug)]
pub struct LatestSlot<T> {
    tx: watch::Sender<T>,
}

/// Read side of a latest-value slot. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LatestReader<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> LatestSlot<T> {
    /// Creates a slot holding `initial` and one reader for it.
    pub fn new(initial: T) -> (Self, LatestReader<T>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, LatestReader { rx })
    }

    /// Replaces the held value.
    ///
    /// # Returns
    /// * `Err(EnvError::ChannelClosed)` - every reader has been dropped
    pub fn publish(&self, value: T) -> Result<(), EnvError> {
        self.tx.send(value).map_err(|_| EnvError::ChannelClosed)
    }
}

impl<T: Clone> LatestReader<T> {
    /// Returns a copy of the newest value without waiting.
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }
}

/// Raises the stop request.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observed by the tick driver between ticks.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Creates a connected trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl ShutdownSignal {
    /// True once shutdown was requested (or the trigger was dropped).
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_sees_only_newest_value() {
        let (slot, reader) = LatestSlot::new(0u32);
        slot.publish(1).unwrap();
        slot.publish(2).unwrap();
        slot.publish(3).unwrap();
        assert_eq!(reader.latest(), 3);
    }

    #[test]
    fn test_publish_fails_without_readers() {
        let (slot, reader) = LatestSlot::new(0u32);
        drop(reader);
        assert!(matches!(slot.publish(1), Err(EnvError::ChannelClosed)));
    }

    #[test]
    fn test_shutdown_signal() {
        let (trigger, signal) = shutdown_channel();
        assert!(!signal.is_requested());
        trigger.trigger();
        assert!(signal.is_requested());
    }

    #[test]
    fn test_dropped_trigger_counts_as_shutdown() {
        let (trigger, signal) = shutdown_channel();
        drop(trigger);
        assert!(signal.is_requested());
    }
}
