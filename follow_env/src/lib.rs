//! Follow Environment Abstraction Layer
//!
//! This crate provides the boundary between the tracking control pipeline
//! and everything it talks to, so the same pipeline runs on **Hardware**
//! (tokio, real backends) and in **Simulation** (virtual clock, oracle).
//!
//! # Collaborators
//!
//! - **Detection backends** (`DetectionBackend`): frame → raw detections
//! - **Ranging sensor** (`DistanceSensor`): scene → range sample
//! - **Actuator** (`Actuator`): control command → motion
//! - **Clock** (`FollowContext`): `now()`, `sleep()`, `spawn()`
//!
//! Producers run at their own cadence and publish into a `LatestSlot`;
//! the tick driver only ever reads the newest value and never waits for
//! a fresher one.
//!
//! # Example
//!
//! ```ignore
//! use follow_env::{LatestSlot, RangeSample};
//!
//! let (slot, reader) = LatestSlot::new(RangeSample::default());
//! slot.publish(RangeSample::reading(82.0, 1.25))?;
//! assert!(matches!(reader.latest(), RangeSample::Reading { .. }));
//! ```

mod backend;
mod context;
mod error;
mod slot;
mod tokio_impl;
mod types;

pub use backend::{Actuator, DetectionBackend, DistanceSensor};
pub use context::FollowContext;
pub use error::EnvError;
pub use slot::{shutdown_channel, LatestReader, LatestSlot, ShutdownSignal, ShutdownTrigger};
pub use tokio_impl::TokioContext;
pub use types::{
    BackendKind, ControlCommand, FrameDetections, FrameDims, RangeFault, RangeSample, RawBox,
    RawDetection,
};
