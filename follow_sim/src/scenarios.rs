//! Follow scenarios: scripted worlds that stress one failure mode each.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// FS-001: Subject walks away, then stops; platform closes to standoff
    SteadyFollow,

    /// FS-002: A second person crosses behind the subject
    CrossingDistractor,

    /// FS-003: Subject hidden for a few frames, twice
    BriefOcclusion,

    /// FS-004: Range sensor blacks out for three seconds
    SensorBlackout,

    /// FS-005: Subject leaves the scene for good
    SubjectLost,

    /// FS-006: Subject walks right up to the platform
    TooClose,

    /// FS-007: Detection frames and ticks arrive at irregular intervals
    JitteryFrameRate,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyFollow,
            ScenarioId::CrossingDistractor,
            ScenarioId::BriefOcclusion,
            ScenarioId::SensorBlackout,
            ScenarioId::SubjectLost,
            ScenarioId::TooClose,
            ScenarioId::JitteryFrameRate,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFollow => "steady_follow",
            ScenarioId::CrossingDistractor => "crossing_distractor",
            ScenarioId::BriefOcclusion => "brief_occlusion",
            ScenarioId::SensorBlackout => "sensor_blackout",
            ScenarioId::SubjectLost => "subject_lost",
            ScenarioId::TooClose => "too_close",
            ScenarioId::JitteryFrameRate => "jittery_frame_rate",
        }
    }

    /// Returns the scenario description.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFollow => "Subject walks away then stops; platform settles at standoff",
            ScenarioId::CrossingDistractor => "Distractor crosses behind the subject; selection must not jump",
            ScenarioId::BriefOcclusion => "Subject hidden for a few frames; no stop, no new session",
            ScenarioId::SensorBlackout => "Range sensor fails for 3s; vision-only distance keeps tracking",
            ScenarioId::SubjectLost => "Subject removed from the scene; platform ramps down and holds",
            ScenarioId::TooClose => "Subject approaches inside the safety distance; platform backs off",
            ScenarioId::JitteryFrameRate => "Irregular frame and tick intervals; tracking stays continuous",
        }
    }

    /// Builds the scripted world for this scenario.
    pub fn script(&self) -> ScenarioScript {
        match self {
            ScenarioId::SteadyFollow => ScenarioScript {
                subject: ActorScript::new(120.0, 0.0)
                    .leg(3.0, 15.0, 6.0)
                    .leg(f64::INFINITY, 0.0, 0.0),
                ..ScenarioScript::standing_subject()
            },
            ScenarioId::CrossingDistractor => ScenarioScript {
                subject: ActorScript::new(100.0, 0.0),
                distractors: vec![ActorScript::new(250.0, 150.0).leg(f64::INFINITY, 0.0, -60.0)],
                ..ScenarioScript::standing_subject()
            },
            ScenarioId::BriefOcclusion => ScenarioScript {
                subject: ActorScript::new(110.0, 0.0)
                    .leg(6.0, 8.0, 0.0)
                    .leg(f64::INFINITY, 0.0, 0.0),
                occlusions: vec![(2.0, 2.08), (5.0, 5.08)],
                ..ScenarioScript::standing_subject()
            },
            ScenarioId::SensorBlackout => ScenarioScript {
                subject: ActorScript::new(110.0, 0.0)
                    .leg(6.0, 10.0, 3.0)
                    .leg(f64::INFINITY, 0.0, 0.0),
                sensor_blackouts: vec![(2.0, 5.0)],
                ..ScenarioScript::standing_subject()
            },
            ScenarioId::SubjectLost => ScenarioScript {
                subject: ActorScript::new(100.0, 0.0)
                    .leg(2.0, 0.0, 30.0)
                    .removed_at(2.0),
                ..ScenarioScript::standing_subject()
            },
            ScenarioId::TooClose => ScenarioScript {
                subject: ActorScript::new(100.0, 0.0)
                    .leg(3.0, -40.0, 0.0)
                    .leg(f64::INFINITY, 0.0, 0.0),
                min_gap_cm: Some(18.0),
                ..ScenarioScript::standing_subject()
            },
            ScenarioId::JitteryFrameRate => ScenarioScript {
                subject: ActorScript::new(110.0, 0.0)
                    .leg(4.0, 12.0, 4.0)
                    .leg(f64::INFINITY, 0.0, 0.0),
                frame_interval_jitter: Some((0.02, 0.15)),
                tick_interval_jitter: Some((0.02, 0.05)),
                ..ScenarioScript::standing_subject()
            },
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "steady_follow" | "steady" | "fs_001" => Ok(ScenarioId::SteadyFollow),
            "crossing_distractor" | "crossing" | "fs_002" => Ok(ScenarioId::CrossingDistractor),
            "brief_occlusion" | "occlusion" | "fs_003" => Ok(ScenarioId::BriefOcclusion),
            "sensor_blackout" | "blackout" | "fs_004" => Ok(ScenarioId::SensorBlackout),
            "subject_lost" | "lost" | "fs_005" => Ok(ScenarioId::SubjectLost),
            "too_close" | "close" | "fs_006" => Ok(ScenarioId::TooClose),
            "jittery_frame_rate" | "jitter" | "fs_007" => Ok(ScenarioId::JitteryFrameRate),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

// ============================================================================
// SCRIPTED WORLD
// ============================================================================

/// A constant-velocity segment that lasts until `until` (sim seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub until: f64,

    /// Velocity in cm/s (world frame)
    pub velocity: Vector2<f64>,
}

/// Scripted motion of one person in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorScript {
    /// Start position in cm (world frame, platform starts at the origin facing +x)
    pub start: Vector2<f64>,
    pub legs: Vec<Leg>,

    /// Time at which the actor leaves the scene entirely
    pub removed_at: Option<f64>,
}

impl ActorScript {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            start: Vector2::new(x, y),
            legs: Vec::new(),
            removed_at: None,
        }
    }

    pub fn leg(mut self, until: f64, vx: f64, vy: f64) -> Self {
        self.legs.push(Leg {
            until,
            velocity: Vector2::new(vx, vy),
        });
        self
    }

    pub fn removed_at(mut self, time: f64) -> Self {
        self.removed_at = Some(time);
        self
    }

    /// Scripted velocity at time `t`. Zero once every leg has ended.
    pub fn velocity_at(&self, t: f64) -> Vector2<f64> {
        self.legs
            .iter()
            .find(|leg| t < leg.until)
            .map_or_else(Vector2::zeros, |leg| leg.velocity)
    }

    pub fn is_present(&self, t: f64) -> bool {
        self.removed_at.map_or(true, |removed| t < removed)
    }
}

/// Everything the runner needs to build one scenario world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioScript {
    pub subject: ActorScript,
    pub distractors: Vec<ActorScript>,

    /// Windows (start, end) in which the subject is hidden from the camera
    pub occlusions: Vec<(f64, f64)>,

    /// Windows in which the range sensor reports read errors
    pub sensor_blackouts: Vec<(f64, f64)>,

    /// The subject never steps closer to the platform than this
    pub min_gap_cm: Option<f64>,

    /// Nominal detection frame rate
    pub detection_hz: f64,

    /// Range sensor sample rate
    pub sensor_hz: f64,

    /// Uniform range for detection frame intervals, overriding `detection_hz`
    pub frame_interval_jitter: Option<(f64, f64)>,

    /// Uniform range for tick intervals, overriding the runner's tick rate
    pub tick_interval_jitter: Option<(f64, f64)>,
}

impl ScenarioScript {
    /// A single subject standing 1m ahead with nominal sensor timing.
    pub fn standing_subject() -> Self {
        Self {
            subject: ActorScript::new(100.0, 0.0),
            distractors: Vec::new(),
            occlusions: Vec::new(),
            sensor_blackouts: Vec::new(),
            min_gap_cm: None,
            detection_hz: 15.0,
            sensor_hz: 20.0,
            frame_interval_jitter: None,
            tick_interval_jitter: None,
        }
    }

    pub fn is_occluded(&self, t: f64) -> bool {
        in_any_window(&self.occlusions, t)
    }
}

pub(crate) fn in_any_window(windows: &[(f64, f64)], t: f64) -> bool {
    windows.iter().any(|&(start, end)| t >= start && t < end)
}
