//! Container job types: the reusable scheduler-side grouping of sweep tasks.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::TaskState;
use crate::task::{Priority, SweepTask, TaskId};

/// Scheduler-assigned identifier of a container job.
pub type ContainerId = i64;

/// Identity a container job is looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerKey {
    pub job_name: String,
    pub owner: String,
    pub user_name: String,
}

impl ContainerKey {
    pub fn new(
        job_name: impl Into<String>,
        owner: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            owner: owner.into(),
            user_name: user_name.into(),
        }
    }
}

impl std::fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.job_name, self.owner, self.user_name)
    }
}

/// What a container job reserves: whole nodes or individual cores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    Node,
    #[default]
    Core,
}

/// Request to create a container job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRequest {
    pub key: ContainerKey,
    pub priority: Priority,
    pub unit_type: UnitType,
    pub min_units: u32,
    pub max_units: u32,
}

impl ContainerRequest {
    /// Size a container for `task`: nodes if exclusive, cores otherwise.
    pub fn for_task(key: ContainerKey, task: &SweepTask, max_nodes: u32, max_cores: u32) -> Self {
        let (unit_type, max_units) = if task.exclusive {
            (UnitType::Node, max_nodes)
        } else {
            (UnitType::Core, max_cores)
        };
        Self {
            key,
            priority: task.priority,
            unit_type,
            min_units: 1,
            max_units: max_units.max(1),
        }
    }
}

/// A container job as the scheduler reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerJob {
    pub id: ContainerId,
    pub key: ContainerKey,
    pub priority: Priority,
    pub unit_type: UnitType,
    pub min_units: u32,
    pub max_units: u32,
    pub state: TaskState,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
}

impl ContainerJob {
    /// Whether the container still accepts tasks.
    pub fn is_open(&self) -> bool {
        !self.state.is_closed()
    }
}

/// The scheduler-side form of a sweep: one task expanded over a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametricTask {
    pub name: String,
    pub command_line: String,
    pub start_value: i64,
    pub end_value: i64,
    pub increment_value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_path: Option<PathBuf>,
    pub exclusive: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_nodes: Vec<String>,
}

impl From<&SweepTask> for ParametricTask {
    fn from(task: &SweepTask) -> Self {
        Self {
            name: task.name.clone(),
            command_line: task.command.clone(),
            start_value: task.start_value,
            end_value: task.end_value,
            increment_value: task.increment_value,
            stdout_path: task.log_path.clone(),
            stderr_path: task.log_path.clone(),
            exclusive: task.exclusive,
            requested_nodes: task.requested_nodes.clone(),
        }
    }
}

/// A task inside a container job, as the scheduler reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTask {
    pub id: TaskId,
    pub container_id: ContainerId,
    pub name: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_node: Option<String>,
    /// Consumed CPU time in seconds.
    #[serde(default)]
    pub cpu_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// A compute node known to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub cores: u32,
    pub online: bool,
}

/// Filter for listing container jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub job_name: Option<String>,
    pub owner: Option<String>,
    pub user_name: Option<String>,
}

impl JobFilter {
    /// Match exactly one container identity.
    pub fn for_key(key: &ContainerKey) -> Self {
        Self {
            job_name: Some(key.job_name.clone()),
            owner: Some(key.owner.clone()),
            user_name: Some(key.user_name.clone()),
        }
    }

    pub fn matches(&self, key: &ContainerKey) -> bool {
        self.job_name.as_ref().is_none_or(|n| *n == key.job_name)
            && self.owner.as_ref().is_none_or(|o| *o == key.owner)
            && self.user_name.as_ref().is_none_or(|u| *u == key.user_name)
    }
}
