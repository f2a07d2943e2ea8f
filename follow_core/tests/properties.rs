//! Property tests over randomly generated tick streams.

use follow_core::{
    ControlCommand, ControllerConfig, FollowConfig, FollowPipeline, SafetyState, TickInput,
    TickReport, TrackingController,
};
use follow_env::{BackendKind, FrameDetections, FrameDims, RangeSample, RawBox, RawDetection};
use proptest::prelude::*;

const DT: f64 = 1.0 / 30.0;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
struct TickPlan {
    /// (centre x, box width) of each candidate
    boxes: Vec<(f64, f64)>,
    sensor: Option<f64>,
}

fn tick_plan() -> impl Strategy<Value = TickPlan> {
    (
        prop::collection::vec((0.0f64..640.0, 10.0f64..600.0), 0..3),
        prop::option::of(0.0f64..400.0),
    )
        .prop_map(|(boxes, sensor)| TickPlan { boxes, sensor })
}

fn input_for(plan: &TickPlan, now: f64) -> TickInput {
    TickInput {
        frame: FrameDetections {
            backend: BackendKind::Hybrid,
            frame: FrameDims::new(640, 480),
            timestamp: now,
            detections: plan
                .boxes
                .iter()
                .map(|&(cx, w)| {
                    RawDetection::new(
                        RawBox::TopLeft {
                            x: cx - w / 2.0,
                            y: 40.0,
                            w,
                            h: 400.0,
                        },
                        Some(0.8),
                    )
                })
                .collect(),
        },
        range: plan
            .sensor
            .map_or(RangeSample::default(), |d| RangeSample::reading(d, now)),
        now,
    }
}

fn run(pipeline: &mut FollowPipeline, plans: &[TickPlan], start: f64) -> Vec<TickReport> {
    plans
        .iter()
        .enumerate()
        .map(|(i, plan)| pipeline.tick(input_for(plan, start + i as f64 * DT)))
        .collect()
}

fn no_detections() -> TickPlan {
    TickPlan {
        boxes: vec![],
        sensor: None,
    }
}

proptest! {
    #[test]
    fn prop_rates_stay_within_limits(plans in prop::collection::vec(tick_plan(), 1..120)) {
        let config = FollowConfig::default();
        let c = config.controller.clone();
        let mut pipeline = FollowPipeline::new(config).unwrap();

        for report in run(&mut pipeline, &plans, 0.0) {
            let cmd = report.command();
            prop_assert!(cmd.turn_rate.abs() <= c.max_turn_rate + EPS);
            prop_assert!(cmd.forward_rate <= c.max_forward_rate + EPS);
            prop_assert!(cmd.forward_rate >= -c.max_reverse_rate - EPS);
            if cmd.safety_hold {
                prop_assert!(cmd.is_still());
            }
        }
    }

    #[test]
    fn prop_step_is_bounded(plans in prop::collection::vec(tick_plan(), 2..120)) {
        let config = FollowConfig::default();
        let max_step = config.controller.max_step;
        let mut pipeline = FollowPipeline::new(config).unwrap();

        let mut previous = ControlCommand::default();
        for report in run(&mut pipeline, &plans, 0.0) {
            let cmd = report.command();
            prop_assert!((cmd.turn_rate - previous.turn_rate).abs() <= max_step + EPS);

            // A safety cut of positive forward motion is the one permitted jump
            let safety_cut = report.safety.state.blocks_forward() && previous.forward_rate > 0.0;
            if !safety_cut {
                prop_assert!(
                    (cmd.forward_rate - previous.forward_rate).abs() <= max_step + EPS,
                    "forward jumped {} -> {} in {:?}",
                    previous.forward_rate,
                    cmd.forward_rate,
                    report.safety.state
                );
            }
            previous = cmd;
        }
    }

    #[test]
    fn prop_too_close_never_moves_forward(
        prefix in prop::collection::vec(tick_plan(), 0..60),
        width in 560.0f64..640.0,
        sensor in 5.0f64..29.0,
    ) {
        let mut pipeline = FollowPipeline::new(FollowConfig::default()).unwrap();
        run(&mut pipeline, &prefix, 0.0);

        // A held target elsewhere may need a few ticks to be dropped first
        let start = prefix.len() as f64 * DT;
        let close = vec![TickPlan { boxes: vec![(320.0, width)], sensor: Some(sensor) }; 8];
        let reports = run(&mut pipeline, &close, start);

        for report in &reports {
            if report.safety.state == SafetyState::TooClose {
                prop_assert!(report.command().forward_rate <= 0.0);
            }
        }
        let last = reports.last().unwrap();
        let fused = last.fused.fused_cm().unwrap();
        prop_assert!(fused < pipeline.config().safety.min_safe_distance_cm);
        prop_assert_eq!(last.safety.state, SafetyState::TooClose);
        prop_assert!(last.command().forward_rate <= 0.0);
    }

    #[test]
    fn prop_lost_subject_settles_into_hold(prefix in prop::collection::vec(tick_plan(), 1..90)) {
        let config = FollowConfig::default();
        let bound_secs = config.controller.lost_target_timeout_secs
            + config.fusion.sensor_grace_secs
            + config.safety.degraded_ramp_ticks as f64 * DT
            + 1.0;
        let mut pipeline = FollowPipeline::new(config).unwrap();
        run(&mut pipeline, &prefix, 0.0);

        let start = prefix.len() as f64 * DT;
        let quiet = vec![no_detections(); (bound_secs / DT) as usize];
        let reports = run(&mut pipeline, &quiet, start);

        let held = reports.iter().position(|r| r.command().safety_hold);
        prop_assert!(held.is_some(), "never held within {}s", bound_secs);
        for r in &reports[held.unwrap()..] {
            prop_assert!(r.command().safety_hold);
            prop_assert!(r.command().is_still());
        }
    }

    #[test]
    fn prop_zero_offset_zero_raw_turn(
        deadzone in prop::option::of(0.0f64..200.0),
        frame_width in 1.0f64..4000.0,
    ) {
        let controller = TrackingController::new(ControllerConfig {
            pixel_deadzone_px: deadzone,
            ..Default::default()
        });
        prop_assert_eq!(controller.raw_turn(0.0, frame_width), 0.0);
    }

    #[test]
    fn prop_selector_session_ids_monotonic(plans in prop::collection::vec(tick_plan(), 1..150)) {
        let mut pipeline = FollowPipeline::new(FollowConfig::default()).unwrap();
        let mut last = 0;
        for report in run(&mut pipeline, &plans, 0.0) {
            if let Some(target) = &report.target {
                prop_assert!(target.session_id >= last);
                last = target.session_id;
            }
        }
    }
}
