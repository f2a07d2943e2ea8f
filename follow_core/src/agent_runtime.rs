//! Agent Runtime - drives the pipeline from the environment context.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        FollowAgent                           │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │               Context: FollowContext                    │  │
//! │  │  • now()   → tick timestamps                           │  │
//! │  │  • sleep() → tick rate control                         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │   LatestReader<FrameDetections> ─┐                           │
//! │   LatestReader<RangeSample>  ────┼──► FollowPipeline::tick   │
//! │                                  │            │              │
//! │                                  │            ▼              │
//! │                                  └──── Box<dyn Actuator>     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use follow_core::{FollowAgent, FollowConfig};
//! use follow_env::{shutdown_channel, TokioContext};
//!
//! let ctx = TokioContext::shared();
//! let mut agent = FollowAgent::new(ctx, config, detections, range, actuator)?;
//! let (trigger, signal) = shutdown_channel();
//! let stats = agent.run(signal).await;
//! ```

use crate::config::{ConfigError, FollowConfig};
use crate::follow_control::ControlCommand;
use crate::pipeline::{FollowPipeline, TickInput, TickReport};
use follow_env::{Actuator, FollowContext, FrameDetections, LatestReader, RangeSample, ShutdownSignal};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Counters reported when the driver stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub ticks: u64,
    pub actuator_errors: u64,
    pub held_ticks: u64,
}

/// The tick driver.
///
/// Generic over the context so the same loop runs on tokio or on a
/// virtual clock.
pub struct FollowAgent<Ctx>
where
    Ctx: FollowContext,
{
    /// Environment context
    pub context: Arc<Ctx>,

    pipeline: FollowPipeline,
    detections: LatestReader<FrameDetections>,
    range: LatestReader<RangeSample>,
    actuator: Box<dyn Actuator>,
    stats: AgentStats,
}

impl<Ctx> FollowAgent<Ctx>
where
    Ctx: FollowContext,
{
    pub fn new(
        context: Arc<Ctx>,
        config: FollowConfig,
        detections: LatestReader<FrameDetections>,
        range: LatestReader<RangeSample>,
        actuator: Box<dyn Actuator>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            context,
            pipeline: FollowPipeline::new(config)?,
            detections,
            range,
            actuator,
            stats: AgentStats::default(),
        })
    }

    pub fn pipeline(&self) -> &FollowPipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> AgentStats {
        self.stats
    }

    /// Runs one tick on the newest published inputs and applies the command.
    pub fn tick(&mut self) -> TickReport {
        let input = TickInput {
            frame: self.detections.latest(),
            range: self.range.latest(),
            now: self.context.now_secs(),
        };
        let report = self.pipeline.tick(input);
        let command = report.command();

        self.stats.ticks += 1;
        if command.safety_hold {
            self.stats.held_ticks += 1;
        }
        self.apply(&command);
        report
    }

    /// Ticks at the configured rate until shutdown is requested, then
    /// issues one explicit stop with `safety_hold`.
    pub async fn run(&mut self, shutdown: ShutdownSignal) -> AgentStats {
        let name = self.pipeline.config().driver.name.clone();
        let period = Duration::from_secs_f64(self.pipeline.config().driver.tick_period_secs());
        info!(
            "✓ {} started at {} Hz",
            name,
            self.pipeline.config().driver.tick_rate_hz
        );

        while !shutdown.is_requested() {
            self.tick();
            self.context.sleep(period).await;
        }

        self.apply(&ControlCommand::stop());
        info!(
            "✓ {} stopped after {} ticks ({} actuator errors)",
            name, self.stats.ticks, self.stats.actuator_errors
        );
        self.stats
    }

    fn apply(&mut self, command: &ControlCommand) {
        if let Err(e) = self.actuator.apply(command) {
            self.stats.actuator_errors += 1;
            warn!("Actuator rejected command: {}", e);
        }
    }
}
