//! Simulated ultrasonic range sensor.

use crate::backends::gaussian;
use crate::oracle::WorldSnapshot;
use crate::scenarios::in_any_window;
use follow_env::{DistanceSensor, EnvError, RangeFault, RangeSample};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Range sensor characteristics.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSensorConfig {
    /// Sensor fitted at all
    pub present: bool,

    /// Std dev of reading noise (cm)
    pub noise_cm: f64,

    /// Probability of a read error per sample
    pub dropout: f64,

    /// Half-angle of the sensing cone (radians)
    pub cone_half_angle: f64,

    /// Echoes beyond this never return
    pub max_echo_cm: f64,
}

impl Default for RangeSensorConfig {
    fn default() -> Self {
        Self {
            present: true,
            noise_cm: 1.5,
            dropout: 0.03,
            cone_half_angle: 15f64.to_radians(),
            max_echo_cm: 450.0,
        }
    }
}

/// Reads the nearest person inside the cone.
///
/// Readings beyond the pipeline's valid window are passed through raw;
/// rejecting them is the fusion stage's job.
pub struct SimRangeSensor {
    config: RangeSensorConfig,
    blackouts: Vec<(f64, f64)>,
    rng: ChaCha8Rng,
}

impl SimRangeSensor {
    pub fn new(config: RangeSensorConfig, seed: u64) -> Self {
        Self {
            config,
            blackouts: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Windows (start, end) in which every read fails with a bus error.
    pub fn with_blackouts(mut self, blackouts: Vec<(f64, f64)>) -> Self {
        self.blackouts = blackouts;
        self
    }
}

impl DistanceSensor for SimRangeSensor {
    type Scene = WorldSnapshot;

    fn read(&mut self, scene: &WorldSnapshot) -> Result<RangeSample, EnvError> {
        if !self.config.present {
            return Ok(RangeSample::unavailable(RangeFault::Absent));
        }
        if in_any_window(&self.blackouts, scene.time) {
            return Err(EnvError::sensor(format!("bus blackout at t={:.3}s", scene.time)));
        }
        if self.rng.gen::<f64>() < self.config.dropout {
            return Err(EnvError::sensor("no echo"));
        }

        let nearest = scene
            .views
            .iter()
            .filter(|v| v.bearing.abs() <= self.config.cone_half_angle)
            .map(|v| v.distance_cm)
            .min_by(f64::total_cmp);

        match nearest {
            Some(distance) if distance <= self.config.max_echo_cm => {
                let noisy = distance + gaussian(&mut self.rng, self.config.noise_cm);
                Ok(RangeSample::reading(noisy.max(0.0), scene.time))
            }
            _ => Ok(RangeSample::unavailable(RangeFault::OutOfRange)),
        }
    }
}
