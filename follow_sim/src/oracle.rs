//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the follow scene:
//! - True platform pose, driven by the commands the pipeline emits
//! - True positions of the subject and any distractors
//! - Camera projection of every person into image space
//!
//! World frame: centimetres, platform starts at the origin facing +x,
//! positive y is to the platform's left. Bearings are positive to the right
//! so that a positive bearing lands right of image centre.

use crate::scenarios::{ActorScript, ScenarioScript};
use follow_core::{BoundingBox, ControlCommand, FusionConfig};
use follow_env::FrameDims;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Pinhole camera mounted on the platform, looking along its heading.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    pub frame: FrameDims,

    /// Horizontal field of view (radians)
    pub hfov_rad: f64,

    /// Box width seen at `reference_distance_cm`
    pub reference_width_px: f64,
    pub reference_distance_cm: f64,

    /// Box height / box width for a standing person
    pub aspect: f64,

    /// Vertical centre shift (px·cm); nearer people sit lower in the image
    pub vertical_parallax: f64,
}

impl Default for CameraModel {
    fn default() -> Self {
        Self {
            frame: FrameDims::new(640, 480),
            hfov_rad: 60f64.to_radians(),
            reference_width_px: 160.0,
            reference_distance_cm: 100.0,
            aspect: 2.4,
            vertical_parallax: 4000.0,
        }
    }
}

impl CameraModel {
    /// Camera whose size/distance calibration matches the pipeline's.
    pub fn matching(fusion: &FusionConfig) -> Self {
        Self {
            reference_width_px: fusion.reference_width_px,
            reference_distance_cm: fusion.reference_distance_cm,
            ..Self::default()
        }
    }

    pub fn in_view(&self, bearing: f64) -> bool {
        bearing.abs() < self.hfov_rad / 2.0
    }

    /// Projects a person at (bearing, distance) to an unclipped pixel box.
    pub fn project(&self, bearing: f64, distance_cm: f64) -> Option<BoundingBox> {
        if !self.in_view(bearing) || distance_cm <= 1.0 {
            return None;
        }
        let (cx0, cy0) = self.frame.center();
        let cx = cx0 + bearing.tan() / (self.hfov_rad / 2.0).tan() * cx0;
        let cy = cy0 - self.vertical_parallax / distance_cm;
        let width = self.reference_width_px * self.reference_distance_cm / distance_cm;
        let height = width * self.aspect;
        Some(BoundingBox::new(cx - width / 2.0, cy - height / 2.0, width, height))
    }
}

/// Platform speed limits at full command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicLimits {
    /// Speed at forward_rate = 1.0 (cm/s)
    pub max_speed_cm_s: f64,

    /// Yaw rate at turn_rate = 1.0 (rad/s)
    pub max_yaw_rate: f64,
}

impl Default for KinematicLimits {
    fn default() -> Self {
        Self {
            max_speed_cm_s: 100.0,
            max_yaw_rate: 2.0,
        }
    }
}

/// True platform pose and motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformState {
    pub position: Vector2<f64>,

    /// Heading (radians, counter-clockwise from +x)
    pub heading: f64,
    pub speed_cm_s: f64,
    pub yaw_rate: f64,
}

impl Default for PlatformState {
    fn default() -> Self {
        Self {
            position: Vector2::zeros(),
            heading: 0.0,
            speed_cm_s: 0.0,
            yaw_rate: 0.0,
        }
    }
}

/// A ground truth person in the scene.
#[derive(Debug, Clone)]
pub struct Actor {
    /// Unique actor ID (0 is always the subject)
    pub id: u64,
    pub position: Vector2<f64>,
    pub velocity: Vector2<f64>,
    pub present: bool,
    script: ActorScript,
}

impl Actor {
    fn new(id: u64, script: ActorScript) -> Self {
        Self {
            id,
            position: script.start,
            velocity: Vector2::zeros(),
            present: script.is_present(0.0),
            script,
        }
    }
}

/// How one actor appears from the platform at an instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorView {
    pub id: u64,
    pub is_subject: bool,
    pub distance_cm: f64,

    /// Bearing relative to heading (radians, positive right)
    pub bearing: f64,
    pub occluded: bool,

    /// Speed of the actor's image motion source (actor plus platform motion), cm/s
    pub apparent_speed_cm_s: f64,

    /// Unclipped image box, if inside the field of view
    pub bbox: Option<BoundingBox>,
}

impl ActorView {
    /// Whether a camera could see this actor at all.
    pub fn visible(&self) -> bool {
        self.bbox.is_some() && !self.occluded
    }
}

/// Everything a backend or sensor may observe at one instant.
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    pub time: f64,
    pub frame: FrameDims,
    pub views: Vec<ActorView>,
}

impl WorldSnapshot {
    pub fn subject(&self) -> Option<&ActorView> {
        self.views.iter().find(|v| v.is_subject)
    }
}

/// Position of an entity for export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntityPosition {
    pub id: u64,
    pub is_subject: bool,
    pub x: f64,
    pub y: f64,
}

/// Ground truth oracle for the follow scene.
pub struct Oracle {
    script: ScenarioScript,
    camera: CameraModel,
    limits: KinematicLimits,
    platform: PlatformState,
    actors: Vec<Actor>,
    time: f64,
}

impl Oracle {
    /// Creates the scene described by `script`. The subject is actor 0.
    pub fn new(script: ScenarioScript, camera: CameraModel) -> Self {
        let actors = std::iter::once(script.subject.clone())
            .chain(script.distractors.iter().cloned())
            .enumerate()
            .map(|(id, script)| Actor::new(id as u64, script))
            .collect();

        Self {
            script,
            camera,
            limits: KinematicLimits::default(),
            platform: PlatformState::default(),
            actors,
            time: 0.0,
        }
    }

    pub fn with_limits(mut self, limits: KinematicLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Advances the world by `dt` seconds under `command`.
    pub fn step(&mut self, dt: f64, command: &ControlCommand) {
        let (speed, yaw_rate) = if command.safety_hold {
            (0.0, 0.0)
        } else {
            (
                command.forward_rate * self.limits.max_speed_cm_s,
                // Positive turn_rate turns right, i.e. clockwise
                -command.turn_rate * self.limits.max_yaw_rate,
            )
        };
        let platform = &mut self.platform;
        platform.speed_cm_s = speed;
        platform.yaw_rate = yaw_rate;
        platform.heading = wrap_angle(platform.heading + yaw_rate * dt);
        platform.position += Vector2::new(platform.heading.cos(), platform.heading.sin()) * speed * dt;

        let platform_position = platform.position;
        let min_gap = self.script.min_gap_cm;
        for actor in &mut self.actors {
            let velocity = actor.script.velocity_at(self.time);
            let next = actor.position + velocity * dt;

            let blocked = actor.id == 0
                && min_gap.map_or(false, |gap| {
                    let before = (actor.position - platform_position).norm();
                    let after = (next - platform_position).norm();
                    after < gap && after < before
                });

            if blocked {
                actor.velocity = Vector2::zeros();
            } else {
                actor.velocity = velocity;
                actor.position = next;
            }
        }

        self.time += dt;
        for actor in &mut self.actors {
            actor.present = actor.script.is_present(self.time);
        }
    }

    /// Current time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn platform(&self) -> &PlatformState {
        &self.platform
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn script(&self) -> &ScenarioScript {
        &self.script
    }

    /// How every present actor appears from the platform right now.
    pub fn snapshot(&self) -> WorldSnapshot {
        let occluded = self.script.is_occluded(self.time);
        let views = self
            .actors
            .iter()
            .filter(|a| a.present)
            .map(|actor| self.view_of(actor, actor.id == 0 && occluded))
            .collect();

        WorldSnapshot {
            time: self.time,
            frame: self.camera.frame,
            views,
        }
    }

    /// Ground truth view of the subject, if still in the scene.
    pub fn subject_view(&self) -> Option<ActorView> {
        self.actors
            .first()
            .filter(|a| a.present)
            .map(|a| self.view_of(a, self.script.is_occluded(self.time)))
    }

    /// True platform-to-subject distance.
    pub fn subject_distance(&self) -> Option<f64> {
        self.subject_view().map(|v| v.distance_cm)
    }

    /// All present entities for export.
    pub fn positions(&self) -> Vec<EntityPosition> {
        self.actors
            .iter()
            .filter(|a| a.present)
            .map(|a| EntityPosition {
                id: a.id,
                is_subject: a.id == 0,
                x: a.position.x,
                y: a.position.y,
            })
            .collect()
    }

    fn view_of(&self, actor: &Actor, occluded: bool) -> ActorView {
        let relative = actor.position - self.platform.position;
        let distance_cm = relative.norm();
        let bearing = wrap_angle(self.platform.heading - relative.y.atan2(relative.x));
        let apparent_speed_cm_s = actor.velocity.norm()
            + self.platform.speed_cm_s.abs()
            + self.platform.yaw_rate.abs() * distance_cm;

        ActorView {
            id: actor.id,
            is_subject: actor.id == 0,
            distance_cm,
            bearing,
            occluded,
            apparent_speed_cm_s,
            bbox: self.camera.project(bearing, distance_cm),
        }
    }
}

/// Wraps an angle into (-π, π].
fn wrap_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a <= -PI {
        a += 2.0 * PI;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::{ActorScript, ScenarioId};
    use approx::assert_relative_eq;

    fn oracle_with(subject: ActorScript) -> Oracle {
        let script = ScenarioScript {
            subject,
            ..ScenarioScript::standing_subject()
        };
        Oracle::new(script, CameraModel::default())
    }

    #[test]
    fn test_subject_straight_ahead_projects_to_centre() {
        let oracle = oracle_with(ActorScript::new(100.0, 0.0));
        let view = oracle.subject_view().unwrap();
        let bbox = view.bbox.unwrap();

        assert_relative_eq!(view.distance_cm, 100.0);
        assert_relative_eq!(view.bearing, 0.0);
        assert_relative_eq!(bbox.center().x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.width, 160.0, epsilon = 1e-9);
    }

    #[test]
    fn test_subject_on_the_right_projects_right_of_centre() {
        // Negative y is the platform's right
        let oracle = oracle_with(ActorScript::new(100.0, -30.0));
        let view = oracle.subject_view().unwrap();
        assert!(view.bearing > 0.0);
        assert!(view.bbox.unwrap().center().x > 320.0);
    }

    #[test]
    fn test_outside_fov_has_no_box() {
        let oracle = oracle_with(ActorScript::new(10.0, 100.0));
        let view = oracle.subject_view().unwrap();
        assert!(view.bbox.is_none());
        assert!(!view.visible());
    }

    #[test]
    fn test_forward_command_moves_platform() {
        let mut oracle = oracle_with(ActorScript::new(200.0, 0.0));
        for _ in 0..10 {
            oracle.step(0.1, &ControlCommand::new(0.0, 0.5));
        }
        assert_relative_eq!(oracle.platform().position.x, 50.0, epsilon = 1e-9);
        assert_relative_eq!(oracle.subject_distance().unwrap(), 150.0, epsilon = 1e-9);
        assert_relative_eq!(oracle.time(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_positive_turn_rotates_clockwise() {
        let mut oracle = oracle_with(ActorScript::new(100.0, -30.0));
        let before = oracle.subject_view().unwrap().bearing;
        oracle.step(0.1, &ControlCommand::new(0.5, 0.0));
        assert!(oracle.platform().heading < 0.0);
        assert!(oracle.subject_view().unwrap().bearing < before);
    }

    #[test]
    fn test_hold_freezes_platform() {
        let mut oracle = oracle_with(ActorScript::new(100.0, 0.0));
        oracle.step(1.0, &ControlCommand::stop());
        assert_eq!(oracle.platform().position, Vector2::zeros());
        assert_eq!(oracle.platform().speed_cm_s, 0.0);
    }

    #[test]
    fn test_min_gap_stops_approaching_subject() {
        let mut oracle = Oracle::new(ScenarioId::TooClose.script(), CameraModel::default());
        for _ in 0..300 {
            oracle.step(0.01, &ControlCommand::default());
        }
        let distance = oracle.subject_distance().unwrap();
        assert!(distance >= 17.0 && distance < 19.0, "distance {}", distance);
    }

    #[test]
    fn test_removed_subject_disappears() {
        let mut oracle = Oracle::new(ScenarioId::SubjectLost.script(), CameraModel::default());
        assert!(oracle.subject_view().is_some());
        for _ in 0..21 {
            oracle.step(0.1, &ControlCommand::default());
        }
        assert!(oracle.subject_view().is_none());
        assert!(oracle.snapshot().subject().is_none());
    }

    #[test]
    fn test_occlusion_hides_subject() {
        let mut oracle = Oracle::new(ScenarioId::BriefOcclusion.script(), CameraModel::default());
        for _ in 0..201 {
            oracle.step(0.01, &ControlCommand::default());
        }
        let view = oracle.snapshot().subject().copied().unwrap();
        assert!(view.occluded);
        assert!(!view.visible());
    }

    #[test]
    fn test_wrap_angle() {
        assert_relative_eq!(wrap_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(0.25), 0.25);
    }
}
