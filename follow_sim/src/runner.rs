//! Scenario runner - drives the follow agent through scripted worlds.
//!
//! Each tick:
//! 1. Step the oracle with the command the platform is executing
//! 2. Publish a detection frame / range sample when their cadence is due
//! 3. Run one `FollowAgent::tick` on the newest published inputs
//! 4. Check invariants and collect metrics

use crate::actuator::CommandLatch;
use crate::backends::make_backend;
use crate::context::SimContext;
use crate::exporter::{SimExport, SimFrame};
use crate::oracle::{CameraModel, Oracle, WorldSnapshot};
use crate::scenarios::{ScenarioId, ScenarioScript};
use crate::sensor::{RangeSensorConfig, SimRangeSensor};

use follow_core::{
    ControlCommand, ControllerConfig, DetectionNormalizer, FollowAgent, FollowConfig, FusionMode,
    SafetyState, SelectionEvent, TargetReport, TickReport,
};
use follow_env::{BackendKind, DistanceSensor, FollowContext, FrameDetections, LatestSlot, RangeSample};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const EPS: f64 = 1e-9;

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Detection backend variant
    pub backend: BackendKind,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub ticks: u64,
    pub frames_published: u64,
    pub samples_published: u64,

    /// Range reads that failed and were published as `ReadError`
    pub sensor_faults: u64,

    /// Ticks with a selected target
    pub tracked_ticks: u64,
    pub sessions: u64,
    pub lost_events: u64,

    /// Ticks whose target was nearest to someone other than the subject
    pub wrong_target_ticks: u64,

    /// Target moved off the subject although the subject was in the frame
    pub switches_while_visible: u64,

    pub held_ticks: u64,
    pub first_hold_time: Option<f64>,
    pub final_hold: bool,

    pub degraded_ticks: u64,
    pub too_close_ticks: u64,
    pub too_far_ticks: u64,

    pub fusion_ticks: u64,
    pub vision_only_ticks: u64,
    pub sensor_fallback_ticks: u64,

    pub min_forward_rate: f64,
    pub max_turn_step: f64,
    pub max_forward_step: f64,
    pub safety_cuts: u64,

    pub invariant_violations: u64,
    pub actuator_errors: u64,

    /// True platform-to-subject distance at the end, if the subject remains
    pub final_distance_cm: Option<f64>,
}

impl ScenarioMetrics {
    pub fn tracked_fraction(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.tracked_ticks as f64 / self.ticks as f64
    }

    fn record(&mut self, report: &TickReport) {
        let command = report.command();
        self.ticks += 1;

        if report.target.is_some() {
            self.tracked_ticks += 1;
        }
        match report.selection {
            SelectionEvent::Acquired => self.sessions += 1,
            SelectionEvent::Lost => self.lost_events += 1,
            _ => {}
        }

        if command.safety_hold {
            self.held_ticks += 1;
            self.first_hold_time.get_or_insert(report.time);
        }
        self.final_hold = command.safety_hold;

        match report.safety.state {
            SafetyState::Degraded => self.degraded_ticks += 1,
            SafetyState::TooClose => self.too_close_ticks += 1,
            SafetyState::TooFar => self.too_far_ticks += 1,
            SafetyState::Normal => {}
        }
        match report.fused.mode {
            FusionMode::Fusion { .. } => self.fusion_ticks += 1,
            FusionMode::VisionOnly { .. } => self.vision_only_ticks += 1,
            FusionMode::SensorFallback { .. } => self.sensor_fallback_ticks += 1,
            FusionMode::Unavailable => {}
        }

        self.min_forward_rate = self.min_forward_rate.min(command.forward_rate);
    }
}

// ============================================================================
// INVARIANTS
// ============================================================================

/// Checks every emitted command against the controller's guarantees.
struct InvariantChecker {
    limits: ControllerConfig,
    previous: ControlCommand,
    first_violation: Option<String>,
}

impl InvariantChecker {
    fn new(limits: ControllerConfig) -> Self {
        Self {
            limits,
            previous: ControlCommand::default(),
            first_violation: None,
        }
    }

    fn check(&mut self, report: &TickReport, metrics: &mut ScenarioMetrics) {
        let cmd = report.command();
        let prev = self.previous;
        let limits = &self.limits;
        let mut violations = Vec::new();

        if cmd.turn_rate.abs() > limits.max_turn_rate + EPS {
            violations.push(format!("turn {:.3} exceeds limit", cmd.turn_rate));
        }
        if cmd.forward_rate > limits.max_forward_rate + EPS
            || cmd.forward_rate < -limits.max_reverse_rate - EPS
        {
            violations.push(format!("forward {:.3} exceeds limits", cmd.forward_rate));
        }

        let turn_step = (cmd.turn_rate - prev.turn_rate).abs();
        let forward_step = (cmd.forward_rate - prev.forward_rate).abs();
        if turn_step > limits.max_step + EPS {
            violations.push(format!("turn jumped {:.3} -> {:.3}", prev.turn_rate, cmd.turn_rate));
        }
        metrics.max_turn_step = metrics.max_turn_step.max(turn_step);

        let safety_cut = report.safety.state.blocks_forward() && prev.forward_rate > 0.0;
        if safety_cut {
            metrics.safety_cuts += 1;
        } else {
            if forward_step > limits.max_step + EPS {
                violations.push(format!(
                    "forward jumped {:.3} -> {:.3}",
                    prev.forward_rate, cmd.forward_rate
                ));
            }
            metrics.max_forward_step = metrics.max_forward_step.max(forward_step);
        }

        if report.safety.state.blocks_forward() && cmd.forward_rate > 0.0 {
            violations.push(format!(
                "forward {:.3} while {}",
                cmd.forward_rate, report.safety.state
            ));
        }
        if cmd.safety_hold && !cmd.is_still() {
            violations.push("safety_hold with non-zero rates".to_string());
        }

        if !violations.is_empty() {
            metrics.invariant_violations += violations.len() as u64;
            warn!("Invariant violated at t={:.3}s: {}", report.time, violations.join("; "));
            if self.first_violation.is_none() {
                self.first_violation = Some(format!("t={:.3}s: {}", report.time, violations[0]));
            }
        }
        self.previous = cmd;
    }
}

/// Id of the visible person whose true box centre is nearest the target.
fn identify(target: &TargetReport, snapshot: &WorldSnapshot) -> Option<(u64, bool)> {
    snapshot
        .views
        .iter()
        .filter(|v| v.visible())
        .filter_map(|v| {
            let center = v.bbox?.center();
            let d = (center.x - target.center_x).hypot(center.y - target.center_y);
            Some((v.id, v.is_subject, d))
        })
        .min_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(id, is_subject, _)| (id, is_subject))
}

/// Whether any normalized detection in `frame` lies on the subject.
fn subject_detected(normalizer: &DetectionNormalizer, frame: &FrameDetections, snapshot: &WorldSnapshot) -> bool {
    let Some(truth) = snapshot.subject().filter(|v| v.visible()).and_then(|v| v.bbox) else {
        return false;
    };
    let tolerance = (0.25 * truth.width).max(30.0);
    let center = truth.center();
    normalizer
        .normalize(frame)
        .iter()
        .any(|d| (d.center().x - center.x).hypot(d.center().y - center.y) < tolerance)
}

// ============================================================================
// RUNNER
// ============================================================================

/// Runs follow scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Simulated duration in seconds
    max_duration_secs: f64,

    backend: BackendKind,
    config: FollowConfig,
    sensor: RangeSensorConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        let config = FollowConfig::default();
        Self {
            seed,
            tick_rate_hz: config.driver.tick_rate_hz,
            max_duration_secs: 10.0,
            backend: BackendKind::Model,
            config,
            sensor: RangeSensorConfig::default(),
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the simulated duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_config(mut self, config: FollowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sensor(mut self, sensor: RangeSensorConfig) -> Self {
        self.sensor = sensor;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario, recording one export frame per tick.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.seed, self.backend.name());
        let result = self.execute(scenario, Some(&mut export));
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, mut export: Option<&mut SimExport>) -> ScenarioResult {
        info!(
            "Starting scenario: {} (seed={}, backend={})",
            scenario.name(),
            self.seed,
            self.backend
        );

        let script = scenario.script();
        let ctx = SimContext::shared(self.seed);
        let mut oracle = Oracle::new(script.clone(), CameraModel::matching(&self.config.fusion));
        let mut backend = make_backend(self.backend, ctx.derive_seed(1));
        let mut sensor = SimRangeSensor::new(self.sensor.clone(), ctx.derive_seed(2))
            .with_blackouts(script.sensor_blackouts.clone());
        let mut timing = ChaCha8Rng::seed_from_u64(ctx.derive_seed(3));
        let normalizer = DetectionNormalizer::new(self.config.normalizer.clone());

        let frame_dims = oracle.camera().frame;
        let (frame_slot, frame_reader) =
            LatestSlot::new(FrameDetections::empty(self.backend, frame_dims, 0.0));
        let (range_slot, range_reader) = LatestSlot::new(RangeSample::default());
        let latch = CommandLatch::new();

        let mut agent = match FollowAgent::new(
            ctx.clone(),
            self.config.clone(),
            frame_reader,
            range_reader,
            Box::new(latch.clone()),
        ) {
            Ok(agent) => agent,
            Err(e) => {
                return ScenarioResult {
                    scenario,
                    seed: self.seed,
                    backend: self.backend,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    failure_reason: Some(format!("Invalid configuration: {}", e)),
                    metrics: ScenarioMetrics::default(),
                }
            }
        };

        let nominal_dt = 1.0 / self.tick_rate_hz as f64;
        let mut checker = InvariantChecker::new(self.config.controller.clone());
        let mut metrics = ScenarioMetrics::default();
        let mut next_frame_at = 0.0;
        let mut next_sample_at = 0.0;
        let mut subject_in_frame = false;
        let mut target_was_subject = false;
        let mut next_progress = 1.0;

        while ctx.now_secs() < self.max_duration_secs {
            let dt = jittered(&mut timing, script.tick_interval_jitter, nominal_dt);
            oracle.step(dt, &latch.current());
            ctx.advance_time(Duration::from_secs_f64(dt));
            let now = ctx.now_secs();

            if now >= next_frame_at {
                let snapshot = oracle.snapshot();
                let frame = backend.detect(&snapshot).unwrap_or_else(|e| {
                    warn!("Backend failed at t={:.3}s: {}", now, e);
                    FrameDetections::empty(self.backend, snapshot.frame, snapshot.time)
                });
                subject_in_frame = subject_detected(&normalizer, &frame, &snapshot);
                if let Err(e) = frame_slot.publish(frame) {
                    warn!("Detection slot closed: {}", e);
                }
                metrics.frames_published += 1;
                next_frame_at = now + frame_interval(&mut timing, &script);
            }

            if now >= next_sample_at {
                let snapshot = oracle.snapshot();
                let sample = sensor.read(&snapshot).unwrap_or_else(|e| {
                    debug!("Range sensor failed at t={:.3}s: {}", now, e);
                    metrics.sensor_faults += 1;
                    RangeSample::unavailable(follow_env::RangeFault::ReadError)
                });
                if let Err(e) = range_slot.publish(sample) {
                    warn!("Range slot closed: {}", e);
                }
                metrics.samples_published += 1;
                next_sample_at = now + 1.0 / script.sensor_hz;
            }

            let report = agent.tick();
            checker.check(&report, &mut metrics);
            metrics.record(&report);

            let snapshot = oracle.snapshot();
            let identity = report.target.as_ref().and_then(|t| identify(t, &snapshot));
            let target_is_subject = matches!(identity, Some((_, true)));
            if matches!(identity, Some((_, false))) {
                metrics.wrong_target_ticks += 1;
                if target_was_subject && subject_in_frame && report.selection == SelectionEvent::Continued {
                    metrics.switches_while_visible += 1;
                    warn!("Target switched off the subject at t={:.3}s", now);
                }
            }
            target_was_subject = target_is_subject;

            if now >= next_progress {
                debug!(
                    "t={:.1}s mode={} safety={} cmd=({:.3}, {:.3})",
                    now,
                    report.fused.mode.name(),
                    report.safety.state,
                    report.command().turn_rate,
                    report.command().forward_rate
                );
                next_progress += 1.0;
            }

            if let Some(export) = export.as_deref_mut() {
                export.add_frame(SimFrame {
                    time_sec: now,
                    platform: oracle.platform().into(),
                    ground_truth: oracle.positions(),
                    true_distance_cm: oracle.subject_distance(),
                    report,
                });
            }
        }

        metrics.actuator_errors = agent.stats().actuator_errors;
        metrics.final_distance_cm = oracle.subject_distance();

        let verdict = match checker.first_violation.take() {
            Some(violation) => Err(format!("Invariant violated at {}", violation)),
            None => evaluate(scenario, &script, &metrics, &self.config, self.tick_rate_hz),
        };

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            backend: self.backend,
            passed: verdict.is_ok(),
            total_ticks: metrics.ticks,
            final_time_secs: ctx.now_secs(),
            failure_reason: verdict.err(),
            metrics,
        };

        info!(
            "Scenario {} finished: {} ticks, tracked {:.0}%, {} sessions, {} held",
            scenario.name(),
            result.total_ticks,
            result.metrics.tracked_fraction() * 100.0,
            result.metrics.sessions,
            result.metrics.held_ticks
        );
        result
    }
}

fn jittered(rng: &mut ChaCha8Rng, range: Option<(f64, f64)>, nominal: f64) -> f64 {
    match range {
        Some((lo, hi)) if hi > lo => rng.gen_range(lo..hi),
        Some((lo, _)) => lo,
        None => nominal,
    }
}

fn frame_interval(rng: &mut ChaCha8Rng, script: &ScenarioScript) -> f64 {
    jittered(rng, script.frame_interval_jitter, 1.0 / script.detection_hz)
}

/// Scenario-specific pass criteria.
fn evaluate(
    scenario: ScenarioId,
    script: &ScenarioScript,
    m: &ScenarioMetrics,
    config: &FollowConfig,
    tick_rate_hz: u32,
) -> Result<(), String> {
    let require = |ok: bool, reason: String| if ok { Ok(()) } else { Err(reason) };
    let tracked = |min: f64| {
        require(
            m.tracked_fraction() >= min,
            format!("Tracked only {:.0}% of ticks", m.tracked_fraction() * 100.0),
        )
    };
    let never_held = || require(m.held_ticks == 0, format!("Platform held for {} ticks", m.held_ticks));

    match scenario {
        ScenarioId::SteadyFollow => {
            tracked(0.8)?;
            let target = config.controller.target_distance_cm;
            let distance = m.final_distance_cm.unwrap_or(f64::INFINITY);
            require(
                (distance - target).abs() <= 50.0,
                format!("Settled at {:.1}cm, target {:.1}cm", distance, target),
            )
        }
        ScenarioId::CrossingDistractor => {
            tracked(0.8)?;
            require(
                m.switches_while_visible == 0,
                format!("Selection jumped to a distractor {} times", m.switches_while_visible),
            )
        }
        ScenarioId::BriefOcclusion => {
            tracked(0.8)?;
            never_held()
        }
        ScenarioId::SensorBlackout => {
            tracked(0.8)?;
            never_held()?;
            require(
                m.vision_only_ticks >= 30,
                format!("Only {} vision-only ticks during blackout", m.vision_only_ticks),
            )
        }
        ScenarioId::SubjectLost => {
            let removed = script.subject.removed_at.unwrap_or(0.0);
            let bound = removed
                + config.controller.lost_target_timeout_secs
                + config.fusion.sensor_grace_secs
                + config.safety.degraded_ramp_ticks as f64 / tick_rate_hz as f64
                + 0.5;
            match m.first_hold_time {
                None => Err("Never stopped after the subject left".to_string()),
                Some(t) if t < removed => Err(format!("Held at {:.2}s while subject present", t)),
                Some(t) if t > bound => Err(format!("Held only at {:.2}s (bound {:.2}s)", t, bound)),
                Some(_) => require(m.final_hold, "Hold released without a subject".to_string()),
            }
        }
        ScenarioId::TooClose => {
            require(m.too_close_ticks > 0, "Never reached TOO_CLOSE".to_string())?;
            require(
                m.min_forward_rate < 0.0,
                "Never reversed away from the subject".to_string(),
            )
        }
        ScenarioId::JitteryFrameRate => {
            tracked(0.75)?;
            never_held()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_scenarios_pass_with_model_backend() {
        let runner = ScenarioRunner::new(42);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}\n{:#?}",
                scenario,
                result.failure_reason,
                result.metrics
            );
            assert_eq!(result.metrics.invariant_violations, 0);
        }
    }

    #[test]
    fn test_invariants_hold_for_every_backend() {
        for backend in BackendKind::all() {
            let runner = ScenarioRunner::new(7).with_backend(backend).with_duration(6.0);
            for scenario in [ScenarioId::CrossingDistractor, ScenarioId::TooClose] {
                let result = runner.run(scenario);
                assert_eq!(
                    result.metrics.invariant_violations, 0,
                    "{} / {}: {:?}",
                    backend, scenario, result.failure_reason
                );
            }
        }
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = ScenarioRunner::new(11).with_duration(3.0).run(ScenarioId::JitteryFrameRate);
        let b = ScenarioRunner::new(11).with_duration(3.0).run(ScenarioId::JitteryFrameRate);
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.total_ticks, b.total_ticks);
    }

    #[test]
    fn test_invalid_config_fails_cleanly() {
        let mut config = FollowConfig::default();
        config.fusion.vision_weight = 2.0;
        let result = ScenarioRunner::new(1).with_config(config).run(ScenarioId::SteadyFollow);

        assert!(!result.passed);
        assert_eq!(result.total_ticks, 0);
        assert!(result.failure_reason.unwrap().contains("vision_weight"));
    }

    #[test]
    fn test_export_has_one_frame_per_tick() {
        let runner = ScenarioRunner::new(3).with_duration(1.0);
        let (result, export) = runner.run_with_export(ScenarioId::SteadyFollow);

        assert_eq!(export.frames.len() as u64, result.total_ticks);
        assert_eq!(export.passed, result.passed);
        assert_eq!(export.backend, "model");
        let json = serde_json::to_value(&export.frames[0]).unwrap();
        assert!(json["report"]["control"]["command"].is_object());
    }

    #[test]
    fn test_sensor_absent_still_tracks_on_vision() {
        let runner = ScenarioRunner::new(5)
            .with_duration(4.0)
            .with_sensor(RangeSensorConfig {
                present: false,
                ..Default::default()
            });
        let result = runner.run(ScenarioId::SteadyFollow);

        assert_eq!(result.metrics.fusion_ticks, 0);
        assert!(result.metrics.vision_only_ticks > 60);
        assert_eq!(result.metrics.invariant_violations, 0);
    }

    #[test]
    fn test_sensor_blackout_surfaces_as_fault() {
        let (result, export) = ScenarioRunner::new(42)
            .with_duration(6.0)
            .run_with_export(ScenarioId::SensorBlackout);

        // 3 s at 20 Hz
        assert!(result.metrics.sensor_faults >= 55);
        let during: Vec<_> = export
            .frames
            .iter()
            .filter(|f| (2.2..4.8).contains(&f.time_sec))
            .collect();
        assert!(!during.is_empty());
        for frame in during {
            assert_eq!(frame.report.fused.sensor, follow_core::SensorStatus::Fault);
        }
        assert_eq!(result.metrics.invariant_violations, 0);
    }
}
