//! Wire types exchanged with the pipeline's collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies the detection backend that produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Frame-difference / background-subtraction detector
    Motion,
    /// Contour / edge-shape detector
    Edge,
    /// Learned model detector
    Model,
    /// Motion + edge consensus
    Hybrid,
}

impl BackendKind {
    /// Returns every backend kind.
    pub fn all() -> [BackendKind; 4] {
        [
            BackendKind::Motion,
            BackendKind::Edge,
            BackendKind::Model,
            BackendKind::Hybrid,
        ]
    }

    /// Returns the backend name.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Motion => "motion",
            BackendKind::Edge => "edge",
            BackendKind::Model => "model",
            BackendKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "motion" => Ok(BackendKind::Motion),
            "edge" => Ok(BackendKind::Edge),
            "model" => Ok(BackendKind::Model),
            "hybrid" => Ok(BackendKind::Hybrid),
            other => Err(format!("Unknown backend: {}", other)),
        }
    }
}

/// Pixel dimensions of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDims {
    pub width: u32,
    pub height: u32,
}

impl FrameDims {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Frame centre in pixels.
    pub fn center(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    /// Frame area in square pixels.
    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Distance from the centre to a corner.
    pub fn half_diagonal(&self) -> f64 {
        let (cx, cy) = self.center();
        (cx * cx + cy * cy).sqrt()
    }
}

impl Default for FrameDims {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

/// A bounding box in whichever layout the backend natively emits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum RawBox {
    /// Top-left corner plus size, pixels.
    TopLeft { x: f64, y: f64, w: f64, h: f64 },
    /// Two opposite corners, pixels.
    Corners { x1: f64, y1: f64, x2: f64, y2: f64 },
    /// Centre plus size as fractions of the frame dimensions.
    Normalized { cx: f64, cy: f64, w: f64, h: f64 },
}

/// One backend-specific detection before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub bbox: RawBox,

    /// Backend confidence; backends that don't score report `None`
    pub confidence: Option<f64>,
}

impl RawDetection {
    pub fn new(bbox: RawBox, confidence: Option<f64>) -> Self {
        Self { bbox, confidence }
    }
}

/// Everything one backend reported for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    pub backend: BackendKind,
    pub frame: FrameDims,

    /// Capture time of the frame (seconds)
    pub timestamp: f64,

    pub detections: Vec<RawDetection>,
}

impl FrameDetections {
    /// A frame with nothing in it.
    pub fn empty(backend: BackendKind, frame: FrameDims, timestamp: f64) -> Self {
        Self {
            backend,
            frame,
            timestamp,
            detections: Vec::new(),
        }
    }
}

/// Why the ranging collaborator has no reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeFault {
    /// No sensor fitted / not started
    Absent,
    /// Read attempted and failed
    ReadError,
    /// Sensor itself flagged the echo as outside its range
    OutOfRange,
}

/// Output of the ranging collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeSample {
    /// A measured distance (cm) and when it was measured (seconds).
    Reading { distance: f64, timestamp: f64 },
    Unavailable { fault: RangeFault },
}

impl RangeSample {
    pub fn reading(distance: f64, timestamp: f64) -> Self {
        Self::Reading {
            distance,
            timestamp,
        }
    }

    pub fn unavailable(fault: RangeFault) -> Self {
        Self::Unavailable { fault }
    }
}

impl Default for RangeSample {
    fn default() -> Self {
        Self::unavailable(RangeFault::Absent)
    }
}

/// One actuation command.
///
/// `turn_rate` and `forward_rate` are in [-1, 1]: negative turn is left,
/// negative forward is reverse. With `safety_hold` set the actuator must
/// not move regardless of the rates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlCommand {
    pub turn_rate: f64,
    pub forward_rate: f64,
    pub safety_hold: bool,
}

impl ControlCommand {
    /// Builds a moving command, clamping both rates into [-1, 1].
    pub fn new(turn_rate: f64, forward_rate: f64) -> Self {
        Self {
            turn_rate: turn_rate.clamp(-1.0, 1.0),
            forward_rate: forward_rate.clamp(-1.0, 1.0),
            safety_hold: false,
        }
    }

    /// Explicit stop with the hold flag raised.
    pub fn stop() -> Self {
        Self {
            turn_rate: 0.0,
            forward_rate: 0.0,
            safety_hold: true,
        }
    }

    /// True when both rates are exactly zero.
    pub fn is_still(&self) -> bool {
        self.turn_rate == 0.0 && self.forward_rate == 0.0
    }
}
