//! The scheduler client seam.

use farm_core::{
    ContainerId, ContainerJob, ContainerRequest, FarmError, JobFilter, NodeInfo, ParametricTask,
    Priority, SchedulerTask, TaskId,
};

/// Errors reported by a scheduler client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Cannot reach head node {0}")]
    Unreachable(String),

    #[error("Not connected to a head node")]
    NotConnected,

    #[error("Unknown container job {0}")]
    UnknownJob(ContainerId),

    #[error("Unknown task {0}")]
    UnknownTask(TaskId),

    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<SchedulerError> for FarmError {
    fn from(e: SchedulerError) -> Self {
        FarmError::Backend(e.to_string())
    }
}

/// Operations the remote farm needs from a cluster scheduler.
///
/// Calls are synchronous; implementations must be safe to share between
/// threads.
pub trait SchedulerClient: Send + Sync {
    /// Connect to the scheduler's head node.
    fn connect(&self, head_node: &str) -> Result<(), SchedulerError>;

    /// Create a container job in the `Configuring` state.
    fn create_job(&self, request: &ContainerRequest) -> Result<ContainerJob, SchedulerError>;

    fn set_priority(&self, job_id: ContainerId, priority: Priority) -> Result<(), SchedulerError>;

    /// Attach a task to a container that has not been submitted yet.
    fn add_task(&self, job_id: ContainerId, task: &ParametricTask)
    -> Result<TaskId, SchedulerError>;

    /// Submit a configuring container, together with its tasks, as `user_name`.
    fn submit_job(&self, job_id: ContainerId, user_name: &str) -> Result<(), SchedulerError>;

    /// Add and submit a task to an already running container.
    fn submit_task(
        &self,
        job_id: ContainerId,
        task: &ParametricTask,
    ) -> Result<TaskId, SchedulerError>;

    /// Fetch the container's current state.
    fn refresh_job(&self, job_id: ContainerId) -> Result<ContainerJob, SchedulerError>;

    fn list_tasks(&self, job_id: ContainerId) -> Result<Vec<SchedulerTask>, SchedulerError>;

    fn cancel_task(&self, job_id: ContainerId, task_id: TaskId) -> Result<(), SchedulerError>;

    fn list_nodes(&self) -> Result<Vec<NodeInfo>, SchedulerError>;

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ContainerJob>, SchedulerError>;
}
