//! Collaborator traits: detection backends, the ranging sensor, the actuator.

use crate::error::EnvError;
use crate::types::{BackendKind, ControlCommand, FrameDetections, RangeSample};

/// A pluggable detection backend.
///
/// The pipeline depends only on this capability, never on a concrete
/// variant.
///
/// # Implementations
///
/// - **Hardware**: wraps a camera-side detector (background subtraction,
///   contour analysis, an ONNX model, ...)
/// - **Simulation**: projects the oracle's ground truth with per-variant
///   noise, dropout and output layout
///
/// # Returns
/// An empty `FrameDetections` is a valid "nothing seen" result. `Err` is
/// reserved for the backend itself breaking; the producer logs it and
/// publishes an empty frame.
pub trait DetectionBackend: Send {
    /// Frame representation this backend consumes.
    type Frame;

    /// Which variant this is.
    fn kind(&self) -> BackendKind;

    /// Runs detection over one frame.
    fn detect(&mut self, frame: &Self::Frame) -> Result<FrameDetections, EnvError>;
}

/// A ranging sensor (ultrasonic, ToF, ...).
///
/// `Scene` is whatever the sensor needs to take a measurement: `()` on
/// hardware, the oracle's world snapshot in simulation.
pub trait DistanceSensor: Send {
    type Scene;

    /// Takes one reading.
    ///
    /// Out-of-range echoes may be returned either as a raw `Reading` (the
    /// pipeline rejects it against the declared range) or as
    /// `Unavailable { fault: OutOfRange }`.
    fn read(&mut self, scene: &Self::Scene) -> Result<RangeSample, EnvError>;
}

/// Drives the platform's motors.
pub trait Actuator: Send {
    /// Applies one command. Must honour `safety_hold` by not moving.
    fn apply(&mut self, command: &ControlCommand) -> Result<(), EnvError>;
}
