//! Core domain types for the sweep farm.
//!
//! This crate contains shared types used across all packages:
//! - SweepTask and Priority for dispatched work
//! - JobState, TaskState and JobHandle for the lifecycle
//! - ContainerJob and friends for the remote scheduler seam
//! - FarmConfig, FarmError, FarmEvent and PipelineResult

mod config;
mod container;
mod error;
mod events;
mod result;
mod state;
mod task;

pub use config::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_WAIT_TIMEOUT_SECS, FarmConfig};
pub use container::{
    ContainerId, ContainerJob, ContainerKey, ContainerRequest, JobFilter, NodeInfo,
    ParametricTask, SchedulerTask, UnitType,
};
pub use error::FarmError;
pub use events::FarmEvent;
pub use result::{Phase, PipelineResult, RunId};
pub use state::{JobHandle, JobState, TaskState, convert_state, settle_state};
pub use task::{Priority, SWEEP_PLACEHOLDER, SweepTask, TaskId};
