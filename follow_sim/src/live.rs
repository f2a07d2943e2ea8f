//! Live mode: the agent on wall-clock time with concurrent producers.
//!
//! ```text
//!  physics task ──step──► Oracle ◄──snapshot── detector task ──► LatestSlot<FrameDetections>
//!       ▲                   ▲                                          │
//!       │                   └───snapshot── sensor task ──► LatestSlot<RangeSample>
//!       │                                                              │
//!  CommandLatch ◄──────────── FollowAgent::run (TokioContext) ◄────────┘
//! ```
//!
//! Producers publish at their own cadence; the agent always consumes the
//! newest value and never waits on either of them.

use crate::actuator::CommandLatch;
use crate::backends::{make_backend, SimBackend};
use crate::oracle::{CameraModel, Oracle};
use crate::scenarios::{ScenarioId, ScenarioScript};
use crate::sensor::{RangeSensorConfig, SimRangeSensor};

use follow_core::{AgentStats, ConfigError, FollowAgent, FollowConfig};
use follow_env::{
    shutdown_channel, BackendKind, ControlCommand, DistanceSensor, FollowContext, FrameDetections,
    LatestSlot, RangeFault, RangeSample, ShutdownSignal, TokioContext,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// What a live run did.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSummary {
    pub scenario: ScenarioId,
    pub backend: BackendKind,
    pub stats: AgentStats,
    pub frames_published: u64,
    pub samples_published: u64,
    pub final_command: ControlCommand,
    pub final_distance_cm: Option<f64>,
}

type SharedOracle = Arc<Mutex<Oracle>>;

fn lock(oracle: &SharedOracle) -> MutexGuard<'_, Oracle> {
    oracle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one scenario in real time.
pub struct LiveRunner {
    seed: u64,
    backend: BackendKind,
    config: FollowConfig,
    sensor: RangeSensorConfig,
    duration: Duration,
    physics_period: Duration,
}

impl LiveRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            backend: BackendKind::Model,
            config: FollowConfig::default(),
            sensor: RangeSensorConfig::default(),
            duration: Duration::from_secs(10),
            physics_period: Duration::from_millis(10),
        }
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

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Runs until the duration elapses, then stops the agent.
    pub async fn run(&self, scenario: ScenarioId) -> Result<LiveSummary, LiveError> {
        info!(
            "Starting live run: {} (seed={}, backend={}, {:.1}s)",
            scenario.name(),
            self.seed,
            self.backend,
            self.duration.as_secs_f64()
        );

        let script = scenario.script();
        let ctx = TokioContext::shared();
        let oracle: SharedOracle = Arc::new(Mutex::new(Oracle::new(
            script.clone(),
            CameraModel::matching(&self.config.fusion),
        )));
        let frame_dims = lock(&oracle).camera().frame;

        let (frame_slot, frame_reader) =
            LatestSlot::new(FrameDetections::empty(self.backend, frame_dims, 0.0));
        let (range_slot, range_reader) = LatestSlot::new(RangeSample::default());
        let latch = CommandLatch::new();
        let (trigger, signal) = shutdown_channel();

        let mut agent = FollowAgent::new(
            ctx.clone(),
            self.config.clone(),
            frame_reader,
            range_reader,
            Box::new(latch.clone()),
        )?;

        let frames = Arc::new(AtomicU64::new(0));
        let samples = Arc::new(AtomicU64::new(0));

        ctx.spawn(
            "physics",
            physics_loop(
                ctx.clone(),
                Arc::clone(&oracle),
                latch.clone(),
                self.physics_period,
                signal.clone(),
            ),
        );
        ctx.spawn(
            "detector",
            detector_loop(
                ctx.clone(),
                Arc::clone(&oracle),
                make_backend(self.backend, self.seed.wrapping_add(1)),
                frame_slot,
                script.clone(),
                ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(3)),
                Arc::clone(&frames),
                signal.clone(),
            ),
        );
        ctx.spawn(
            "range-sensor",
            sensor_loop(
                ctx.clone(),
                Arc::clone(&oracle),
                SimRangeSensor::new(self.sensor.clone(), self.seed.wrapping_add(2))
                    .with_blackouts(script.sensor_blackouts.clone()),
                range_slot,
                Duration::from_secs_f64(1.0 / script.sensor_hz),
                Arc::clone(&samples),
                signal.clone(),
            ),
        );

        let timer_ctx = ctx.clone();
        let duration = self.duration;
        ctx.spawn("shutdown-timer", async move {
            timer_ctx.sleep(duration).await;
            trigger.trigger();
        });

        let stats = agent.run(signal).await;

        let summary = LiveSummary {
            scenario,
            backend: self.backend,
            stats,
            frames_published: frames.load(Ordering::SeqCst),
            samples_published: samples.load(Ordering::SeqCst),
            final_command: latch.current(),
            final_distance_cm: lock(&oracle).subject_distance(),
        };
        info!(
            "✓ Live run finished: {} ticks, {} frames, {} range samples",
            summary.stats.ticks, summary.frames_published, summary.samples_published
        );
        Ok(summary)
    }
}

async fn physics_loop(
    ctx: Arc<TokioContext>,
    oracle: SharedOracle,
    latch: CommandLatch,
    period: Duration,
    shutdown: ShutdownSignal,
) {
    let mut last = ctx.now_secs();
    while !shutdown.is_requested() {
        ctx.sleep(period).await;
        let now = ctx.now_secs();
        lock(&oracle).step(now - last, &latch.current());
        last = now;
    }
    debug!("physics task stopped");
}

#[allow(clippy::too_many_arguments)]
async fn detector_loop(
    ctx: Arc<TokioContext>,
    oracle: SharedOracle,
    mut backend: SimBackend,
    slot: LatestSlot<FrameDetections>,
    script: ScenarioScript,
    mut timing: ChaCha8Rng,
    published: Arc<AtomicU64>,
    shutdown: ShutdownSignal,
) {
    while !shutdown.is_requested() {
        let snapshot = lock(&oracle).snapshot();
        match backend.detect(&snapshot) {
            Ok(frame) => {
                if slot.publish(frame).is_err() {
                    break;
                }
                published.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => warn!("Detection backend failed: {}", e),
        }

        let interval = match script.frame_interval_jitter {
            Some((lo, hi)) if hi > lo => timing.gen_range(lo..hi),
            _ => 1.0 / script.detection_hz,
        };
        ctx.sleep(Duration::from_secs_f64(interval)).await;
    }
    debug!("detector task stopped");
}

async fn sensor_loop(
    ctx: Arc<TokioContext>,
    oracle: SharedOracle,
    mut sensor: SimRangeSensor,
    slot: LatestSlot<RangeSample>,
    period: Duration,
    published: Arc<AtomicU64>,
    shutdown: ShutdownSignal,
) {
    while !shutdown.is_requested() {
        let snapshot = lock(&oracle).snapshot();
        let sample = sensor.read(&snapshot).unwrap_or_else(|e| {
            debug!("Range sensor failed: {}", e);
            RangeSample::unavailable(RangeFault::ReadError)
        });
        if slot.publish(sample).is_err() {
            break;
        }
        published.fetch_add(1, Ordering::SeqCst);
        ctx.sleep(period).await;
    }
    debug!("range sensor task stopped");
}
