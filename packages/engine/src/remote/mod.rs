//! Remote farm platform: a scheduler client seam, the farm handle that
//! manages container jobs through it, and the pipeline backend on top.

mod computation;
mod farm;
mod memory;
mod scheduler;

pub use computation::RemoteFarmComputation;
pub use farm::RemoteFarm;
pub use memory::InMemoryScheduler;
pub use scheduler::{SchedulerClient, SchedulerError};
