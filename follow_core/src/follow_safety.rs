//! Safety monitor: gates motion on the fused distance.
//!
//! Re-evaluated from scratch every tick. The only carried state is the
//! count of consecutive DEGRADED ticks, which drives the ramp-to-stop.

use crate::config::SafetyConfig;
use crate::follow_fusion::FusedDistance;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    Normal,
    /// Forward motion blocked; reverse and turning allowed
    TooClose,
    /// Forward closing motion suppressed; turning allowed
    TooFar,
    /// No usable distance; all motion ramps to stop
    Degraded,
}

impl SafetyState {
    /// True if forward rate must be clamped to ≤ 0.
    pub fn blocks_forward(&self) -> bool {
        matches!(self, SafetyState::TooClose | SafetyState::TooFar)
    }
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SafetyState::Normal => "NORMAL",
            SafetyState::TooClose => "TOO_CLOSE",
            SafetyState::TooFar => "TOO_FAR",
            SafetyState::Degraded => "DEGRADED",
        };
        f.write_str(name)
    }
}

/// Monitor verdict for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    pub state: SafetyState,

    /// Consecutive DEGRADED ticks including this one (0 otherwise)
    pub degraded_ticks: u32,

    /// Ticks the ramp-to-stop spans
    pub ramp_ticks: u32,
}

impl SafetyAssessment {
    /// DEGRADED ticks left before the ramp reaches zero, this one included.
    pub fn ramp_remaining(&self) -> u32 {
        (self.ramp_ticks + 1).saturating_sub(self.degraded_ticks)
    }

    pub fn ramp_complete(&self) -> bool {
        self.state == SafetyState::Degraded && self.degraded_ticks >= self.ramp_ticks
    }
}

pub struct SafetyMonitor {
    config: SafetyConfig,
    degraded_ticks: u32,
    last_state: SafetyState,
}

impl SafetyMonitor {
    pub fn new(config: SafetyConfig) -> Self {
        Self {
            config,
            degraded_ticks: 0,
            last_state: SafetyState::Normal,
        }
    }

    /// Classifies a distance alone (no ramp bookkeeping).
    pub fn classify(&self, fused: &FusedDistance) -> SafetyState {
        match fused.fused_cm() {
            None => SafetyState::Degraded,
            Some(d) if d < self.config.min_safe_distance_cm => SafetyState::TooClose,
            Some(d) if d > self.config.max_track_distance_cm => SafetyState::TooFar,
            Some(_) => SafetyState::Normal,
        }
    }

    pub fn assess(&mut self, fused: &FusedDistance) -> SafetyAssessment {
        let state = self.classify(fused);

        self.degraded_ticks = if state == SafetyState::Degraded {
            self.degraded_ticks.saturating_add(1)
        } else {
            0
        };

        if state != self.last_state {
            match state {
                SafetyState::Normal => info!("Safety {} -> {}", self.last_state, state),
                _ => warn!(
                    "Safety {} -> {} (distance {:?})",
                    self.last_state,
                    state,
                    fused.fused_cm()
                ),
            }
            self.last_state = state;
        }

        SafetyAssessment {
            state,
            degraded_ticks: self.degraded_ticks,
            ramp_ticks: self.config.degraded_ramp_ticks,
        }
    }
}
