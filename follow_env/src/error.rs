//! Error types for the follow environment abstraction.

use thiserror::Error;

/// Errors raised by collaborators at the environment boundary.
///
/// None of these ever escape a control tick: producers translate them into
/// "no detections" or `RangeSample::Unavailable`, and the driver logs
/// actuator failures and keeps ticking.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Detection backend failed to process a frame
    #[error("Detection backend failure: {0}")]
    BackendFailure(String),

    /// Ranging sensor read failed (no echo, bus error, ...)
    #[error("Distance sensor failure: {0}")]
    SensorFailure(String),

    /// Actuator rejected or failed to apply a command
    #[error("Actuator failure: {0}")]
    ActuatorFailure(String),

    /// All readers or the writer of a latest-value slot are gone
    #[error("Channel closed")]
    ChannelClosed,
}

impl EnvError {
    /// Creates a backend failure.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::BackendFailure(msg.into())
    }

    /// Creates a sensor failure.
    pub fn sensor(msg: impl Into<String>) -> Self {
        Self::SensorFailure(msg.into())
    }

    /// Creates an actuator failure.
    pub fn actuator(msg: impl Into<String>) -> Self {
        Self::ActuatorFailure(msg.into())
    }
}
