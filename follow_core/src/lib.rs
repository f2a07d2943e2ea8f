//! Follow Core - tracking control pipeline for a subject-following platform
//!
//! Reconciles three independently unreliable inputs into one smooth, safe
//! actuation command per tick:
//! 1. **Flickering detections**: canonicalised by the Normalizer, held by a
//!    continuity-first Selector
//! 2. **Noisy or absent ranging**: fused with a vision estimate under an
//!    explicit fusion mode
//! 3. **Unsafe proximity**: gated by the Safety Monitor before the
//!    Controller shapes, smooths and rate-limits the output

pub mod agent_runtime;
pub mod config;
pub mod follow_control;
pub mod follow_detection;
pub mod follow_fusion;
pub mod follow_safety;
pub mod follow_selection;
pub mod pipeline;

// Re-export key types for convenience
pub use agent_runtime::{AgentStats, FollowAgent};
pub use config::{
    ConfigError, ControllerConfig, DriverConfig, FollowConfig, FusionConfig, NormalizerConfig,
    SafetyConfig, SelectorConfig,
};
pub use follow_control::{ControlCommand, ControlInput, ControlOutput, ControlPhase, TrackingController};
pub use follow_detection::{BoundingBox, Detection, DetectionNormalizer};
pub use follow_fusion::{DistanceEstimator, FusedDistance, FusionMode, SensorStatus};
pub use follow_safety::{SafetyAssessment, SafetyMonitor, SafetyState};
pub use follow_selection::{Selection, SelectionEvent, SmartTargetSelector, TargetState};
pub use pipeline::{FollowPipeline, TargetReport, TickInput, TickReport};
