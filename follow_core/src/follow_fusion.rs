//! The "FUSION" Engine - vision / range-sensor distance estimate
//!
//! Vision distance comes from the pinhole relation against a calibration
//! reference (`d = d_ref * w_ref / w`). The range sensor is smoothed over
//! its last few distinct readings and is usable only when present, fresh
//! and inside its declared range. The result carries an explicit mode so
//! downstream stages match exhaustively instead of inspecting nullables.

use crate::config::FusionConfig;
use crate::follow_detection::Detection;
use follow_env::{RangeFault, RangeSample};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Condition of the range sensor this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SensorStatus {
    /// Fresh, in range; `distance` is the smoothed value
    Valid { distance: f64 },
    /// No sensor or no reading yet
    Absent,
    /// Last reading older than the freshness window
    Stale { age: f64 },
    /// Reading outside the declared range
    OutOfRange { distance: Option<f64> },
    /// Sensor reported a read error
    Fault,
}

impl SensorStatus {
    pub fn distance(&self) -> Option<f64> {
        match self {
            SensorStatus::Valid { distance } => Some(*distance),
            _ => None,
        }
    }
}

/// Which inputs contributed to the distance estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FusionMode {
    Fusion { vision: f64, sensor: f64, fused: f64 },
    VisionOnly { vision: f64 },
    SensorFallback { sensor: f64, since_vision_lost: f64 },
    Unavailable,
}

impl FusionMode {
    pub fn name(&self) -> &'static str {
        match self {
            FusionMode::Fusion { .. } => "fusion",
            FusionMode::VisionOnly { .. } => "vision_only",
            FusionMode::SensorFallback { .. } => "sensor_fallback",
            FusionMode::Unavailable => "unavailable",
        }
    }
}

/// The tick's best standoff estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedDistance {
    /// Vision-derived estimate (cm), if a target was selected
    pub vision_cm: Option<f64>,
    pub sensor: SensorStatus,
    pub mode: FusionMode,
}

impl FusedDistance {
    pub fn unavailable() -> Self {
        Self {
            vision_cm: None,
            sensor: SensorStatus::Absent,
            mode: FusionMode::Unavailable,
        }
    }

    /// Fused value, `None` when unavailable.
    pub fn fused_cm(&self) -> Option<f64> {
        match self.mode {
            FusionMode::Fusion { fused, .. } => Some(fused),
            FusionMode::VisionOnly { vision } => Some(vision),
            FusionMode::SensorFallback { sensor, .. } => Some(sensor),
            FusionMode::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.mode, FusionMode::Unavailable)
    }
}

/// `α·vision + (1 − α)·sensor`
pub fn fuse(vision: f64, sensor: f64, alpha: f64) -> f64 {
    alpha * vision + (1.0 - alpha) * sensor
}

/// How far ahead of `now` a reading may be dated and still count as current.
const CLOCK_SKEW_TOLERANCE_SECS: f64 = 1e-6;

/// Distance estimator with sensor smoothing and vision-loss grace period.
pub struct DistanceEstimator {
    config: FusionConfig,

    /// Recent distinct valid readings `(timestamp, cm)`
    readings: VecDeque<(f64, f64)>,

    /// Time vision last produced an estimate
    last_vision_at: Option<f64>,

    last_mode: &'static str,
}

impl DistanceEstimator {
    pub fn new(config: FusionConfig) -> Self {
        let capacity = config.sensor_smoothing_window;
        Self {
            config,
            readings: VecDeque::with_capacity(capacity),
            last_vision_at: None,
            last_mode: FusionMode::Unavailable.name(),
        }
    }

    /// Vision estimate for a box of the given pixel width.
    pub fn vision_distance(&self, width_px: f64) -> Option<f64> {
        if !width_px.is_finite() || width_px <= 0.0 {
            return None;
        }
        Some(self.config.reference_distance_cm * self.config.reference_width_px / width_px)
    }

    /// Classifies and smooths the range sample.
    pub fn sensor_status(&mut self, sample: &RangeSample, now: f64) -> SensorStatus {
        let status = match *sample {
            RangeSample::Unavailable {
                fault: RangeFault::Absent,
            } => SensorStatus::Absent,
            RangeSample::Unavailable {
                fault: RangeFault::ReadError,
            } => SensorStatus::Fault,
            RangeSample::Unavailable {
                fault: RangeFault::OutOfRange,
            } => SensorStatus::OutOfRange { distance: None },
            RangeSample::Reading {
                distance,
                timestamp,
            } => {
                let age = now - timestamp;
                if !distance.is_finite()
                    || distance < self.config.sensor_min_cm
                    || distance > self.config.sensor_max_cm
                {
                    SensorStatus::OutOfRange {
                        distance: Some(distance),
                    }
                } else if !(-CLOCK_SKEW_TOLERANCE_SECS..=self.config.freshness_window_secs)
                    .contains(&age)
                {
                    // Future-dated readings count as stale
                    SensorStatus::Stale { age }
                } else {
                    if self.readings.back().map(|(t, _)| *t) != Some(timestamp) {
                        self.readings.push_back((timestamp, distance));
                        while self.readings.len() > self.config.sensor_smoothing_window {
                            self.readings.pop_front();
                        }
                    }
                    let sum: f64 = self.readings.iter().map(|(_, d)| d).sum();
                    SensorStatus::Valid {
                        distance: sum / self.readings.len() as f64,
                    }
                }
            }
        };

        if status.distance().is_none() {
            self.readings.clear();
        }
        status
    }

    /// Produces this tick's estimate.
    pub fn estimate(
        &mut self,
        target: Option<&Detection>,
        sample: &RangeSample,
        now: f64,
    ) -> FusedDistance {
        let vision = target.and_then(|d| self.vision_distance(d.width()));
        let sensor = self.sensor_status(sample, now);

        if vision.is_some() {
            self.last_vision_at = Some(now);
        }

        let mode = match (vision, sensor.distance()) {
            (Some(v), Some(s)) => FusionMode::Fusion {
                vision: v,
                sensor: s,
                fused: fuse(v, s, self.config.vision_weight),
            },
            (Some(v), None) => FusionMode::VisionOnly { vision: v },
            (None, Some(s)) => match self.last_vision_at {
                Some(seen) if now - seen <= self.config.sensor_grace_secs => {
                    FusionMode::SensorFallback {
                        sensor: s,
                        since_vision_lost: now - seen,
                    }
                }
                _ => FusionMode::Unavailable,
            },
            (None, None) => FusionMode::Unavailable,
        };

        if mode.name() != self.last_mode {
            match mode {
                FusionMode::Unavailable => warn!("Distance unavailable (sensor: {:?})", sensor),
                FusionMode::SensorFallback { .. } => {
                    info!("Vision lost, falling back to range sensor")
                }
                _ => debug!("Fusion mode {} -> {}", self.last_mode, mode.name()),
            }
            self.last_mode = mode.name();
        }

        FusedDistance {
            vision_cm: vision,
            sensor,
            mode,
        }
    }
}
