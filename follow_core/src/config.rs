//! Pipeline configuration.
//!
//! One `FollowConfig` is loaded (TOML) and validated once at startup; each
//! component receives its own section by value at construction and never
//! mutates it. Invalid values are rejected here, never clamped at runtime.

use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors produced when loading or validating a [`FollowConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Detection quality filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Detections below this confidence are dropped (default: 0.3)
    pub min_confidence: f64,

    /// Minimum clipped box width in pixels (default: 8)
    pub min_box_width_px: f64,

    /// Minimum clipped box height in pixels (default: 8)
    pub min_box_height_px: f64,

    /// Optional lower bound on height / width
    pub min_aspect_ratio: Option<f64>,

    /// Optional upper bound on height / width
    pub max_aspect_ratio: Option<f64>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
            min_box_width_px: 8.0,
            min_box_height_px: 8.0,
            min_aspect_ratio: None,
            max_aspect_ratio: None,
        }
    }
}

/// Smart target selector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Rule-1 weight on confidence (default: 0.6)
    pub confidence_weight: f64,

    /// Rule-1 weight on area / frame area (default: 0.25)
    pub area_weight: f64,

    /// Rule-1 penalty on centre distance / half-diagonal (default: 0.15)
    pub center_weight: f64,

    /// Max displacement in pixels to count as the same subject at the
    /// nominal tick interval (default: 150)
    pub continuity_gap_px: f64,

    /// Tick interval the gap is specified for (default: 1/30 s)
    pub nominal_tick_secs: f64,

    /// Upper bound on the elapsed-time scale applied to the gap (default: 3)
    pub max_gap_scale: f64,

    /// Consecutive misses tolerated before the target is dropped (default: 5)
    pub loss_threshold: u32,

    /// Centres kept in the target history (default: 10)
    pub history_capacity: usize,

    /// EMA rate of the continuity score (default: 0.2)
    pub continuity_gain: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            confidence_weight: 0.6,
            area_weight: 0.25,
            center_weight: 0.15,
            continuity_gap_px: 150.0,
            nominal_tick_secs: 1.0 / 30.0,
            max_gap_scale: 3.0,
            loss_threshold: 5,
            history_capacity: 10,
            continuity_gain: 0.2,
        }
    }
}

/// Vision / sensor distance fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight α of the vision estimate when both are available (default: 0.6)
    pub vision_weight: f64,

    /// Box width in pixels observed at the reference distance (default: 160)
    pub reference_width_px: f64,

    /// Distance in cm at which the reference width was measured (default: 100)
    pub reference_distance_cm: f64,

    /// Lowest valid sensor reading in cm (default: 2)
    pub sensor_min_cm: f64,

    /// Highest valid sensor reading in cm (default: 300)
    pub sensor_max_cm: f64,

    /// Readings older than this are stale (default: 0.5 s)
    pub freshness_window_secs: f64,

    /// How long the sensor may stand in for a lost visual target (default: 1.0 s)
    pub sensor_grace_secs: f64,

    /// Distinct readings averaged for the sensor value (default: 3)
    pub sensor_smoothing_window: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vision_weight: 0.6,
            reference_width_px: 160.0,
            reference_distance_cm: 100.0,
            sensor_min_cm: 2.0,
            sensor_max_cm: 300.0,
            freshness_window_secs: 0.5,
            sensor_grace_secs: 1.0,
            sensor_smoothing_window: 3,
        }
    }
}

/// Safety monitor thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Below this the platform may only reverse or turn (default: 30 cm)
    pub min_safe_distance_cm: f64,

    /// Above this forward tracking is suppressed (default: 200 cm)
    pub max_track_distance_cm: f64,

    /// Ticks over which DEGRADED ramps motion to zero (default: 15)
    pub degraded_ramp_ticks: u32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_safe_distance_cm: 30.0,
            max_track_distance_cm: 200.0,
            degraded_ramp_ticks: 15, // 0.5 s at 30 Hz
        }
    }
}

/// Tracking controller gains, deadzones and smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Standoff distance to hold (default: 80 cm)
    pub target_distance_cm: f64,

    /// Acceptable standoff error (default: 15 cm)
    pub tolerance_cm: f64,

    /// Proportional turn gain (default: 0.3)
    pub turn_gain: f64,

    /// Proportional forward gain (default: 0.5)
    pub forward_gain: f64,

    /// Horizontal deadzone in pixels; `None` = 6% of frame width
    pub pixel_deadzone_px: Option<f64>,

    /// Distance deadzone in cm; `None` = `tolerance_cm`
    pub distance_deadzone_cm: Option<f64>,

    /// Distance error mapped to a full-scale raw forward (default: 100 cm)
    pub forward_error_span_cm: f64,

    /// Weight β of the new value in the output blend (default: 0.35)
    pub smoothing_beta: f64,

    /// Max change of either rate per tick (default: 0.1)
    pub max_step: f64,

    /// Decaying rates below this snap to exactly zero (default: 0.01)
    pub zero_snap: f64,

    /// Output limits (default: 0.7 / 0.45 / 0.3)
    pub max_turn_rate: f64,
    pub max_forward_rate: f64,
    pub max_reverse_rate: f64,

    /// Target within this fraction of either frame edge counts as "at the
    /// edge" (default: 0.1)
    pub edge_margin_fraction: f64,

    /// Forward cap while the target is at the edge (default: 0.2)
    pub edge_forward_limit: f64,

    /// Centeredness bands: |offset| / half-width ≤ fraction → scale
    pub near_center_fraction: f64,
    pub near_center_scale: f64,
    pub mid_center_fraction: f64,
    pub mid_center_scale: f64,

    /// No-target time after which a settled platform is held (default: 2 s)
    pub lost_target_timeout_secs: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            target_distance_cm: 80.0,
            tolerance_cm: 15.0,
            turn_gain: 0.3,
            forward_gain: 0.5,
            pixel_deadzone_px: None,
            distance_deadzone_cm: None,
            forward_error_span_cm: 100.0,
            smoothing_beta: 0.35,
            max_step: 0.1,
            zero_snap: 0.01,
            max_turn_rate: 0.7,
            max_forward_rate: 0.45,
            max_reverse_rate: 0.3,
            edge_margin_fraction: 0.1,
            edge_forward_limit: 0.2,
            near_center_fraction: 0.3,
            near_center_scale: 0.5,
            mid_center_fraction: 0.6,
            mid_center_scale: 0.7,
            lost_target_timeout_secs: 2.0,
        }
    }
}

impl ControllerConfig {
    /// Effective pixel deadzone for a frame of the given width.
    pub fn pixel_deadzone(&self, frame_width: f64) -> f64 {
        self.pixel_deadzone_px.unwrap_or(frame_width * 0.06)
    }

    /// Effective distance deadzone.
    pub fn distance_deadzone(&self) -> f64 {
        self.distance_deadzone_cm.unwrap_or(self.tolerance_cm)
    }
}

/// Tick driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Logical name used in logs
    pub name: String,

    /// Control ticks per second (default: 30)
    pub tick_rate_hz: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "follow-agent".to_string(),
            tick_rate_hz: 30,
        }
    }
}

impl DriverConfig {
    pub fn tick_period_secs(&self) -> f64 {
        1.0 / self.tick_rate_hz.max(1) as f64
    }
}

// ============================================================================
// FOLLOW CONFIG
// ============================================================================

/// Complete, immutable-after-load configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    pub normalizer: NormalizerConfig,
    pub selector: SelectorConfig,
    pub fusion: FusionConfig,
    pub safety: SafetyConfig,
    pub controller: ControllerConfig,
    pub driver: DriverConfig,
}

impl FollowConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: FollowConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks every field and cross-field constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = &self.normalizer;
        unit_interval("normalizer.min_confidence", n.min_confidence)?;
        non_negative("normalizer.min_box_width_px", n.min_box_width_px)?;
        non_negative("normalizer.min_box_height_px", n.min_box_height_px)?;
        if let Some(lo) = n.min_aspect_ratio {
            positive("normalizer.min_aspect_ratio", lo)?;
        }
        if let Some(hi) = n.max_aspect_ratio {
            positive("normalizer.max_aspect_ratio", hi)?;
        }
        if let (Some(lo), Some(hi)) = (n.min_aspect_ratio, n.max_aspect_ratio) {
            if lo > hi {
                return Err(ConfigError::invalid_value(
                    "normalizer.min_aspect_ratio",
                    format!("{} exceeds max_aspect_ratio {}", lo, hi),
                ));
            }
        }

        let s = &self.selector;
        non_negative("selector.confidence_weight", s.confidence_weight)?;
        non_negative("selector.area_weight", s.area_weight)?;
        non_negative("selector.center_weight", s.center_weight)?;
        positive("selector.continuity_gap_px", s.continuity_gap_px)?;
        positive("selector.nominal_tick_secs", s.nominal_tick_secs)?;
        if !s.max_gap_scale.is_finite() || s.max_gap_scale < 1.0 {
            return Err(ConfigError::invalid_value(
                "selector.max_gap_scale",
                "must be >= 1",
            ));
        }
        if s.loss_threshold == 0 {
            return Err(ConfigError::invalid_value("selector.loss_threshold", "must be > 0"));
        }
        if s.history_capacity == 0 {
            return Err(ConfigError::invalid_value("selector.history_capacity", "must be > 0"));
        }
        unit_interval("selector.continuity_gain", s.continuity_gain)?;

        let f = &self.fusion;
        unit_interval("fusion.vision_weight", f.vision_weight)?;
        positive("fusion.reference_width_px", f.reference_width_px)?;
        positive("fusion.reference_distance_cm", f.reference_distance_cm)?;
        non_negative("fusion.sensor_min_cm", f.sensor_min_cm)?;
        positive("fusion.sensor_max_cm", f.sensor_max_cm)?;
        if f.sensor_min_cm >= f.sensor_max_cm {
            return Err(ConfigError::invalid_value(
                "fusion.sensor_min_cm",
                format!("must be below sensor_max_cm ({})", f.sensor_max_cm),
            ));
        }
        non_negative("fusion.freshness_window_secs", f.freshness_window_secs)?;
        non_negative("fusion.sensor_grace_secs", f.sensor_grace_secs)?;
        if f.sensor_smoothing_window == 0 {
            return Err(ConfigError::invalid_value(
                "fusion.sensor_smoothing_window",
                "must be > 0",
            ));
        }

        let sf = &self.safety;
        positive("safety.min_safe_distance_cm", sf.min_safe_distance_cm)?;
        positive("safety.max_track_distance_cm", sf.max_track_distance_cm)?;
        if sf.min_safe_distance_cm >= sf.max_track_distance_cm {
            return Err(ConfigError::invalid_value(
                "safety.min_safe_distance_cm",
                format!(
                    "must be below max_track_distance_cm ({})",
                    sf.max_track_distance_cm
                ),
            ));
        }
        if sf.degraded_ramp_ticks == 0 {
            return Err(ConfigError::invalid_value(
                "safety.degraded_ramp_ticks",
                "must be > 0",
            ));
        }

        let c = &self.controller;
        if c.target_distance_cm < sf.min_safe_distance_cm
            || c.target_distance_cm > sf.max_track_distance_cm
        {
            return Err(ConfigError::invalid_value(
                "controller.target_distance_cm",
                format!(
                    "must lie within [{}, {}]",
                    sf.min_safe_distance_cm, sf.max_track_distance_cm
                ),
            ));
        }
        non_negative("controller.tolerance_cm", c.tolerance_cm)?;
        non_negative("controller.turn_gain", c.turn_gain)?;
        non_negative("controller.forward_gain", c.forward_gain)?;
        if let Some(px) = c.pixel_deadzone_px {
            non_negative("controller.pixel_deadzone_px", px)?;
        }
        if let Some(cm) = c.distance_deadzone_cm {
            non_negative("controller.distance_deadzone_cm", cm)?;
        }
        positive("controller.forward_error_span_cm", c.forward_error_span_cm)?;
        if !c.smoothing_beta.is_finite() || c.smoothing_beta <= 0.0 || c.smoothing_beta > 1.0 {
            return Err(ConfigError::invalid_value(
                "controller.smoothing_beta",
                "must lie in (0, 1]",
            ));
        }
        if !c.max_step.is_finite() || c.max_step <= 0.0 || c.max_step > 1.0 {
            return Err(ConfigError::invalid_value(
                "controller.max_step",
                "must lie in (0, 1]",
            ));
        }
        non_negative("controller.zero_snap", c.zero_snap)?;
        if c.zero_snap > c.max_step {
            return Err(ConfigError::invalid_value(
                "controller.zero_snap",
                format!("must not exceed max_step ({})", c.max_step),
            ));
        }
        unit_interval("controller.max_turn_rate", c.max_turn_rate)?;
        unit_interval("controller.max_forward_rate", c.max_forward_rate)?;
        unit_interval("controller.max_reverse_rate", c.max_reverse_rate)?;
        if !c.edge_margin_fraction.is_finite()
            || c.edge_margin_fraction < 0.0
            || c.edge_margin_fraction >= 0.5
        {
            return Err(ConfigError::invalid_value(
                "controller.edge_margin_fraction",
                "must lie in [0, 0.5)",
            ));
        }
        unit_interval("controller.edge_forward_limit", c.edge_forward_limit)?;
        unit_interval("controller.near_center_fraction", c.near_center_fraction)?;
        unit_interval("controller.mid_center_fraction", c.mid_center_fraction)?;
        if c.near_center_fraction > c.mid_center_fraction {
            return Err(ConfigError::invalid_value(
                "controller.near_center_fraction",
                "must not exceed mid_center_fraction",
            ));
        }
        unit_interval("controller.near_center_scale", c.near_center_scale)?;
        unit_interval("controller.mid_center_scale", c.mid_center_scale)?;
        non_negative("controller.lost_target_timeout_secs", c.lost_target_timeout_secs)?;

        // The linear ramp moves |rate| / ramp_ticks per tick; it must fit in
        // one step for any rate in [-1, 1].
        if (sf.degraded_ramp_ticks as f64) * c.max_step < 1.0 {
            return Err(ConfigError::invalid_value(
                "safety.degraded_ramp_ticks",
                format!(
                    "{} ticks cannot reach zero at max_step {}",
                    sf.degraded_ramp_ticks, c.max_step
                ),
            ));
        }

        if self.driver.tick_rate_hz == 0 {
            return Err(ConfigError::invalid_value("driver.tick_rate_hz", "must be > 0"));
        }

        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid_value(
            field,
            format!("must be finite and >= 0, got {}", value),
        ));
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid_value(
            field,
            format!("must be finite and > 0, got {}", value),
        ));
    }
    Ok(())
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid_value(
            field,
            format!("must lie in [0, 1], got {}", value),
        ));
    }
    Ok(())
}
