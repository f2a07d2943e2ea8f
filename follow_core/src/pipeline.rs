//! One control tick: Normalizer → Selector → Fusion → Safety → Controller.
//!
//! `tick` is synchronous, never blocks and never fails. Every irregularity
//! (no detections, sensor gone, target lost) comes back as state in the
//! `TickReport`.

use crate::config::{ConfigError, FollowConfig};
use crate::follow_control::{ControlCommand, ControlInput, ControlOutput, TrackingController};
use crate::follow_detection::{Detection, DetectionNormalizer};
use crate::follow_fusion::{DistanceEstimator, FusedDistance};
use crate::follow_safety::{SafetyAssessment, SafetyMonitor};
use crate::follow_selection::{SelectionEvent, SmartTargetSelector};
use follow_env::{FrameDetections, RangeSample};
use serde::Serialize;

/// Latest collaborator values consumed by one tick.
#[derive(Debug, Clone)]
pub struct TickInput {
    pub frame: FrameDetections,
    pub range: RangeSample,

    /// Tick time in seconds on the driver's clock
    pub now: f64,
}

/// Selected target as reported per tick.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub session_id: u64,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub confidence: f64,
    pub horizontal_offset: f64,
}

/// Everything one tick decided.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub time: f64,
    pub detections: usize,
    pub selection: SelectionEvent,
    pub target: Option<TargetReport>,
    pub continuity: f64,
    pub fused: FusedDistance,
    pub safety: SafetyAssessment,
    pub control: ControlOutput,
}

impl TickReport {
    pub fn command(&self) -> ControlCommand {
        self.control.command
    }
}

/// The tracking control pipeline. Each stage owns its private state; the
/// pipeline must be driven from one tick driver at a time.
pub struct FollowPipeline {
    config: FollowConfig,
    normalizer: DetectionNormalizer,
    selector: SmartTargetSelector,
    fusion: DistanceEstimator,
    safety: SafetyMonitor,
    controller: TrackingController,
    tick_count: u64,
}

impl FollowPipeline {
    /// Validates the configuration and builds every stage from its section.
    pub fn new(config: FollowConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            normalizer: DetectionNormalizer::new(config.normalizer.clone()),
            selector: SmartTargetSelector::new(config.selector.clone()),
            fusion: DistanceEstimator::new(config.fusion.clone()),
            safety: SafetyMonitor::new(config.safety.clone()),
            controller: TrackingController::new(config.controller.clone()),
            config,
            tick_count: 0,
        })
    }

    pub fn config(&self) -> &FollowConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn selector(&self) -> &SmartTargetSelector {
        &self.selector
    }

    /// Command emitted by the last tick.
    pub fn last_command(&self) -> ControlCommand {
        self.controller.previous()
    }

    /// Runs one tick.
    pub fn tick(&mut self, input: TickInput) -> TickReport {
        self.tick_count += 1;
        let frame = input.frame.frame;

        let detections: Vec<Detection> = self.normalizer.normalize(&input.frame);
        let selection = self.selector.select(&detections, frame, input.now);
        let target = selection.target.as_ref();
        let fused = self.fusion.estimate(target, &input.range, input.now);
        let safety = self.safety.assess(&fused);
        let control = self.controller.update(ControlInput {
            target,
            fused: &fused,
            safety,
            frame,
            now: input.now,
        });

        TickReport {
            tick: self.tick_count,
            time: input.now,
            detections: detections.len(),
            selection: selection.event,
            target: target.map(|d| TargetReport {
                session_id: selection.session_id.unwrap_or_default(),
                center_x: d.center().x,
                center_y: d.center().y,
                width: d.width(),
                confidence: d.confidence(),
                horizontal_offset: d.horizontal_offset(frame),
            }),
            continuity: selection.continuity,
            fused,
            safety,
            control,
        }
    }
}
