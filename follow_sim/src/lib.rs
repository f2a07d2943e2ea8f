//! Follow Deterministic Simulation Harness
//!
//! A scripted world in which the whole follow pipeline runs reproducibly.
//!
//! # Core Principle
//!
//! All sources of non-determinism are controlled:
//! - **Time**: Virtual clock advances only when the runner ticks
//! - **Perception**: Detections and range samples are generated from a
//!   ground truth oracle through seeded noise models
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimContext (Virtual Clock)                           │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │   detection backend ─┐         ┌─ range sensor              │
//! │                      ▼         ▼                            │
//! │               LatestSlot   LatestSlot                       │
//! │                      └────┬────┘                            │
//! │                     FollowAgent ──► CommandLatch            │
//! │                           ▲               │                 │
//! │  ┌────────────────────────┴───────────────▼──┐              │
//! │  │                  Oracle                    │              │
//! │  │  (Ground truth platform + people)          │              │
//! │  └────────────────────────────────────────────┘              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use follow_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::SteadyFollow);
//! assert!(result.passed);
//! ```

mod actuator;
mod backends;
mod context;
mod exporter;
mod live;
mod oracle;
mod runner;
mod sensor;
pub mod scenarios;

pub use actuator::CommandLatch;
pub use backends::{
    consensus, make_backend, EdgeBackend, HybridBackend, HybridConfig, ModelBackend, MotionBackend,
    NoiseProfile, Observation, SimBackend,
};
pub use context::SimContext;
pub use exporter::{PlatformPose, SimExport, SimFrame};
pub use live::{LiveError, LiveRunner, LiveSummary};
pub use oracle::{ActorView, CameraModel, EntityPosition, KinematicLimits, Oracle, PlatformState, WorldSnapshot};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::{ScenarioId, ScenarioScript};
pub use sensor::{RangeSensorConfig, SimRangeSensor};
