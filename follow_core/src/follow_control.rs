//! The "CONTROL" Engine - enhanced tracking controller
//!
//! Turns (horizontal offset, fused distance, safety state) into one
//! smoothed, rate-limited `ControlCommand` per tick.
//!
//! Per rate, each tick:
//! 1. **Proportional**: deadzone-filtered error normalised to [-1, 1]
//! 2. **Shaping**: gain × centeredness scale, output limits, edge cap
//! 3. **Safety**: TOO_CLOSE / TOO_FAR clamp forward to ≤ 0
//! 4. **Smoothing**: `β·new + (1 − β)·previous`, then step cap
//!
//! Without a target both rates decay through the same smoothing path and
//! the platform is held once settled past the lost-target timeout. In
//! DEGRADED both rates ramp linearly to zero over the configured ticks;
//! the hold follows at ramp end, or at the lost-target timeout when there
//! is no target.
//!
//! The safety clamp is applied after smoothing as well, so a TOO_CLOSE or
//! TOO_FAR transition may cut a positive forward rate by more than
//! `max_step` in one tick. Every other change is step-bounded.

use crate::config::ControllerConfig;
use crate::follow_detection::Detection;
use crate::follow_fusion::FusedDistance;
use crate::follow_safety::{SafetyAssessment, SafetyState};
use follow_env::FrameDims;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use follow_env::ControlCommand;

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// Everything the controller needs for one tick.
#[derive(Debug, Clone, Copy)]
pub struct ControlInput<'a> {
    pub target: Option<&'a Detection>,
    pub fused: &'a FusedDistance,
    pub safety: SafetyAssessment,
    pub frame: FrameDims,
    pub now: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPhase {
    /// Following a selected target
    Tracking,
    /// No target; rates decaying toward zero
    Decaying,
    /// DEGRADED linear ramp-to-stop
    RampingDown,
    /// Stopped with `safety_hold`
    Holding,
}

/// Controller result for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlOutput {
    pub command: ControlCommand,
    pub phase: ControlPhase,

    /// Deadzone-filtered proportional terms before gain and scaling
    pub raw_turn: f64,
    pub raw_forward: f64,

    /// Centeredness scale applied this tick (1.0 when not tracking)
    pub scale: f64,
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct TrackingController {
    config: ControllerConfig,

    /// Previous tick's command (smoothing state)
    previous: ControlCommand,

    /// When the current no-target stretch began
    no_target_since: Option<f64>,

    last_phase: ControlPhase,
}

impl TrackingController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            previous: ControlCommand::default(),
            no_target_since: None,
            last_phase: ControlPhase::Tracking,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The command emitted on the previous tick.
    pub fn previous(&self) -> ControlCommand {
        self.previous
    }

    /// Deadzone-filtered turn term in [-1, 1].
    pub fn raw_turn(&self, horizontal_offset: f64, frame_width: f64) -> f64 {
        let half = frame_width / 2.0;
        if half <= 0.0 || horizontal_offset.abs() < self.config.pixel_deadzone(frame_width) {
            return 0.0;
        }
        (horizontal_offset / half).clamp(-1.0, 1.0)
    }

    /// Deadzone-filtered forward term in [-1, 1] (positive = too far away).
    pub fn raw_forward(&self, fused_cm: f64) -> f64 {
        let error = fused_cm - self.config.target_distance_cm;
        if error.abs() < self.config.distance_deadzone() {
            return 0.0;
        }
        (error / self.config.forward_error_span_cm).clamp(-1.0, 1.0)
    }

    /// Nonlinear gain reduction near the frame centre.
    pub fn centeredness_scale(&self, offset_fraction: f64) -> f64 {
        let c = &self.config;
        if offset_fraction <= c.near_center_fraction {
            c.near_center_scale
        } else if offset_fraction <= c.mid_center_fraction {
            c.mid_center_scale
        } else {
            1.0
        }
    }

    /// One smoothing step from `previous` toward `target`.
    pub fn smooth_toward(&self, previous: f64, target: f64) -> f64 {
        let c = &self.config;
        let mut next = c.smoothing_beta * target + (1.0 - c.smoothing_beta) * previous;
        if target == 0.0 && next.abs() < c.zero_snap {
            next = 0.0;
        }
        previous + (next - previous).clamp(-c.max_step, c.max_step)
    }

    /// Produces this tick's command.
    pub fn update(&mut self, input: ControlInput<'_>) -> ControlOutput {
        let prev = self.previous;

        match input.target {
            Some(_) => self.no_target_since = None,
            None => {
                self.no_target_since.get_or_insert(input.now);
            }
        }

        let mut output = if input.safety.state == SafetyState::Degraded {
            self.ramp_down(prev, &input)
        } else if let Some(target) = input.target {
            self.track(prev, target, &input)
        } else {
            self.decay(prev, &input)
        };

        if output.phase == ControlPhase::Holding {
            output.command = ControlCommand::stop();
        }

        if output.phase != self.last_phase {
            match output.phase {
                ControlPhase::Holding => info!("Platform held (safety_hold)"),
                phase => debug!("Controller {:?} -> {:?}", self.last_phase, phase),
            }
            self.last_phase = output.phase;
        }

        self.previous = output.command;
        output
    }

    fn track(&self, prev: ControlCommand, target: &Detection, input: &ControlInput<'_>) -> ControlOutput {
        let c = &self.config;
        let width = input.frame.width as f64;
        let offset = target.horizontal_offset(input.frame);

        let raw_turn = self.raw_turn(offset, width);
        let raw_forward = input.fused.fused_cm().map_or(0.0, |d| self.raw_forward(d));
        let scale = self.centeredness_scale(offset.abs() / (width / 2.0).max(1.0));

        let turn_target = (raw_turn * c.turn_gain * scale).clamp(-c.max_turn_rate, c.max_turn_rate);
        let mut forward_target =
            (raw_forward * c.forward_gain * scale).clamp(-c.max_reverse_rate, c.max_forward_rate);

        let cx = target.center().x;
        let margin = c.edge_margin_fraction * width;
        if cx < margin || cx > width - margin {
            forward_target = forward_target.min(c.edge_forward_limit);
        }

        let blocks = input.safety.state.blocks_forward();
        if blocks {
            forward_target = forward_target.min(0.0);
        }

        let turn = self.smooth_toward(prev.turn_rate, turn_target);
        let mut forward = self.smooth_toward(prev.forward_rate, forward_target);
        if blocks {
            forward = forward.min(0.0);
        }

        ControlOutput {
            command: ControlCommand::new(turn, forward),
            phase: ControlPhase::Tracking,
            raw_turn,
            raw_forward,
            scale,
        }
    }

    fn decay(&self, prev: ControlCommand, input: &ControlInput<'_>) -> ControlOutput {
        let turn = self.smooth_toward(prev.turn_rate, 0.0);
        let mut forward = self.smooth_toward(prev.forward_rate, 0.0);
        if input.safety.state.blocks_forward() {
            forward = forward.min(0.0);
        }
        let command = ControlCommand::new(turn, forward);

        ControlOutput {
            command,
            phase: if self.lost_timed_out(input.now) && command.is_still() {
                ControlPhase::Holding
            } else {
                ControlPhase::Decaying
            },
            raw_turn: 0.0,
            raw_forward: 0.0,
            scale: 1.0,
        }
    }

    /// Whether the current no-target stretch has lasted the full timeout.
    fn lost_timed_out(&self, now: f64) -> bool {
        self.no_target_since
            .is_some_and(|since| now - since >= self.config.lost_target_timeout_secs)
    }

    fn ramp_down(&self, prev: ControlCommand, input: &ControlInput<'_>) -> ControlOutput {
        let safety = input.safety;
        let remaining = safety.ramp_remaining();
        let step = |rate: f64| {
            if remaining <= 1 {
                0.0
            } else {
                rate - rate / remaining as f64
            }
        };
        let command = ControlCommand::new(step(prev.turn_rate), step(prev.forward_rate));

        ControlOutput {
            command,
            phase: if command.is_still()
                && (self.lost_timed_out(input.now)
                    || (input.target.is_some() && safety.ramp_complete()))
            {
                ControlPhase::Holding
            } else {
                ControlPhase::RampingDown
            },
            raw_turn: 0.0,
            raw_forward: 0.0,
            scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follow_detection::BoundingBox;
    use crate::follow_fusion::{FusionMode, SensorStatus};
    use approx::assert_relative_eq;
    use follow_env::BackendKind;

    const FRAME: FrameDims = FrameDims {
        width: 640,
        height: 480,
    };

    fn target_at(offset: f64, width: f64) -> Detection {
        let cx = 320.0 + offset;
        Detection::new(
            BoundingBox::new(cx - width / 2.0, 40.0, width, 300.0),
            0.9,
            BackendKind::Model,
            0.0,
        )
    }

    fn at(cm: f64) -> FusedDistance {
        FusedDistance {
            vision_cm: Some(cm),
            sensor: SensorStatus::Absent,
            mode: FusionMode::VisionOnly { vision: cm },
        }
    }

    fn safety(state: SafetyState) -> SafetyAssessment {
        SafetyAssessment {
            state,
            degraded_ticks: 0,
            ramp_ticks: 15,
        }
    }

    fn controller() -> TrackingController {
        TrackingController::new(ControllerConfig::default())
    }

    #[test]
    fn test_zero_offset_gives_exact_zero_turn() {
        let ctl = controller();
        assert_eq!(ctl.raw_turn(0.0, 640.0), 0.0);

        let strict = TrackingController::new(ControllerConfig {
            pixel_deadzone_px: Some(0.0),
            ..Default::default()
        });
        assert_eq!(strict.raw_turn(0.0, 640.0), 0.0);
    }

    #[test]
    fn test_pixel_deadzone() {
        let ctl = controller();
        // Default deadzone is 6% of 640 = 38.4px
        assert_eq!(ctl.raw_turn(38.0, 640.0), 0.0);
        assert_relative_eq!(ctl.raw_turn(160.0, 640.0), 0.5);
        assert_relative_eq!(ctl.raw_turn(-480.0, 640.0), -1.0);
    }

    #[test]
    fn test_distance_deadzone() {
        let ctl = controller();
        assert_eq!(ctl.raw_forward(90.0), 0.0);
        assert_relative_eq!(ctl.raw_forward(130.0), 0.5);
        assert_relative_eq!(ctl.raw_forward(40.0), -0.4);
    }

    #[test]
    fn test_centeredness_bands() {
        let ctl = controller();
        assert_eq!(ctl.centeredness_scale(0.1), 0.5);
        assert_eq!(ctl.centeredness_scale(0.5), 0.7);
        assert_eq!(ctl.centeredness_scale(0.9), 1.0);
    }

    #[test]
    fn test_smoothing_blend_and_step_cap() {
        let ctl = controller();
        // 0.35 * 0.2 = 0.07 < max_step
        assert_relative_eq!(ctl.smooth_toward(0.0, 0.2), 0.07, epsilon = 1e-12);
        // 0.35 * 1.0 = 0.35, capped at 0.1
        assert_relative_eq!(ctl.smooth_toward(0.0, 1.0), 0.1);
        // Snap to exact zero
        assert_eq!(ctl.smooth_toward(0.012, 0.0), 0.0);
    }

    #[test]
    fn test_tracking_turns_toward_offset() {
        let mut ctl = controller();
        let target = target_at(-250.0, 200.0);
        let fused = at(80.0);
        let out = ctl.update(ControlInput {
            target: Some(&target),
            fused: &fused,
            safety: safety(SafetyState::Normal),
            frame: FRAME,
            now: 0.0,
        });
        assert_eq!(out.phase, ControlPhase::Tracking);
        assert!(out.command.turn_rate < 0.0);
        assert_eq!(out.command.forward_rate, 0.0);
    }

    #[test]
    fn test_too_close_blocks_forward_even_from_positive() {
        let mut ctl = controller();
        let target = target_at(0.0, 200.0);

        // Build up forward motion
        let far = at(180.0);
        for i in 0..10 {
            ctl.update(ControlInput {
                target: Some(&target),
                fused: &far,
                safety: safety(SafetyState::Normal),
                frame: FRAME,
                now: i as f64 / 30.0,
            });
        }
        assert!(ctl.previous().forward_rate > 0.0);

        // Contradictory input: monitor says too close
        let out = ctl.update(ControlInput {
            target: Some(&target),
            fused: &far,
            safety: safety(SafetyState::TooClose),
            frame: FRAME,
            now: 1.0,
        });
        assert!(out.command.forward_rate <= 0.0);
    }

    #[test]
    fn test_too_close_allows_reverse() {
        let mut ctl = controller();
        let target = target_at(0.0, 300.0);
        let close = at(20.0);
        let mut last = 0.0;
        for i in 0..5 {
            let out = ctl.update(ControlInput {
                target: Some(&target),
                fused: &close,
                safety: safety(SafetyState::TooClose),
                frame: FRAME,
                now: i as f64 / 30.0,
            });
            assert!(out.command.forward_rate < last);
            last = out.command.forward_rate;
        }
    }

    #[test]
    fn test_edge_slowdown_caps_forward() {
        let mut ctl = TrackingController::new(ControllerConfig {
            smoothing_beta: 1.0,
            max_step: 1.0,
            zero_snap: 0.0,
            ..Default::default()
        });
        // Centre at x = 20, inside the 64px margin; 200cm is a full-scale error
        let target = target_at(-300.0, 40.0);
        let fused = at(200.0);
        let out = ctl.update(ControlInput {
            target: Some(&target),
            fused: &fused,
            safety: safety(SafetyState::Normal),
            frame: FRAME,
            now: 0.0,
        });
        assert_relative_eq!(out.command.forward_rate, 0.2);
    }

    #[test]
    fn test_no_target_decays_then_holds() {
        let mut ctl = controller();
        let target = target_at(200.0, 100.0);
        let far = at(160.0);
        let mut now = 0.0;
        for _ in 0..20 {
            ctl.update(ControlInput {
                target: Some(&target),
                fused: &far,
                safety: safety(SafetyState::Normal),
                frame: FRAME,
                now,
            });
            now += 1.0 / 30.0;
        }
        assert!(!ctl.previous().is_still());

        let none = FusedDistance::unavailable();
        let lost_at = now;
        let mut held_at = None;
        for _ in 0..90 {
            let out = ctl.update(ControlInput {
                target: None,
                fused: &none,
                safety: safety(SafetyState::Normal),
                frame: FRAME,
                now,
            });
            if out.command.safety_hold {
                held_at = Some(now);
                break;
            }
            now += 1.0 / 30.0;
        }
        let held_at = held_at.expect("controller never held");
        assert!(held_at - lost_at >= 2.0 - 1e-9);
    }

    #[test]
    fn test_degraded_ramp_is_linear() {
        let mut ctl = controller();
        ctl.previous = ControlCommand::new(0.3, 0.45);
        let target = target_at(0.0, 200.0);
        let none = FusedDistance::unavailable();
        let mut forward = Vec::new();
        for tick in 1..=15 {
            let out = ctl.update(ControlInput {
                target: Some(&target),
                fused: &none,
                safety: SafetyAssessment {
                    state: SafetyState::Degraded,
                    degraded_ticks: tick,
                    ramp_ticks: 15,
                },
                frame: FRAME,
                now: tick as f64 / 30.0,
            });
            forward.push(out.command.forward_rate);
            if tick == 15 {
                assert!(out.command.safety_hold);
                assert!(out.command.is_still());
            }
        }
        for pair in forward.windows(2) {
            assert_relative_eq!(pair[0] - pair[1], 0.03, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degraded_without_target_holds_at_lost_timeout() {
        let mut ctl = controller();
        ctl.previous = ControlCommand::new(0.3, 0.45);
        let none = FusedDistance::unavailable();
        let mut held_at = None;
        for tick in 1..=90u32 {
            let now = tick as f64 / 30.0;
            let out = ctl.update(ControlInput {
                target: None,
                fused: &none,
                safety: SafetyAssessment {
                    state: SafetyState::Degraded,
                    degraded_ticks: tick,
                    ramp_ticks: 15,
                },
                frame: FRAME,
                now,
            });
            if tick >= 15 {
                assert!(out.command.is_still());
            }
            if out.command.safety_hold {
                held_at = Some(now);
                break;
            }
        }
        // No-target stretch began at tick 1
        let held_after = held_at.expect("controller never held") - 1.0 / 30.0;
        assert_relative_eq!(held_after, 2.0, epsilon = 1.0 / 30.0 + 1e-9);
    }
}
