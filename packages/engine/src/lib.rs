//! Parallel execution engine.
//!
//! Drives a fixed four-phase pipeline (Initialize, Broadcast, Reduce,
//! Validate) over one of three platforms:
//! - a local queue that runs deferred calls in order
//! - a pool of worker actors that runs them concurrently
//! - a remote farm that submits parametric sweeps to a cluster scheduler
//!   and waits for done files

pub mod completion;
pub mod factory;
pub mod local;
pub mod pipeline;
pub mod pool;
pub mod process;
pub mod remote;

pub use completion::DoneWatcher;
pub use factory::{Platform, PlatformFactory, PlatformKind};
pub use local::{CallQueue, DeferredCall, OpResult, SingleMachineComputation};
pub use pipeline::{Backend, ParallelComputation};
pub use pool::MultiWorkerComputation;
pub use process::{ProcessCommand, ProcessOutput};
pub use remote::{
    InMemoryScheduler, RemoteFarm, RemoteFarmComputation, SchedulerClient, SchedulerError,
};

// Re-export core types for convenience
pub use farm_core::*;
