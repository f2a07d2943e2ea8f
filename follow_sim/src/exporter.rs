//! JSON exporter for offline replay.
//!
//! Exports one frame per tick: ground truth next to everything the
//! pipeline decided on that tick.

use crate::oracle::{EntityPosition, PlatformState};
use follow_core::TickReport;
use serde::Serialize;
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// True platform pose
    pub platform: PlatformPose,

    /// Ground truth people in the scene
    pub ground_truth: Vec<EntityPosition>,

    /// True platform-to-subject distance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_distance_cm: Option<f64>,

    /// Pipeline output for this tick
    pub report: TickReport,
}

/// Platform pose.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlatformPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl From<&PlatformState> for PlatformPose {
    fn from(state: &PlatformState) -> Self {
        Self {
            x: state.position.x,
            y: state.position.y,
            heading: state.heading,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Detection backend variant
    pub backend: String,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64, backend: &str) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            backend: backend.to_string(),
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
