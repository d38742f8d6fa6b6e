//! Job lifecycle states and the scheduler-state translation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Lifecycle of a job or task as seen by the engine.
///
/// `Create → {Wait, Pend} → Running → Finished → {Succeed | Failed | Canceled}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Built but not yet handed to a backend.
    #[default]
    Create,
    /// Known to the backend, not yet eligible to run.
    Wait,
    /// Queued for dispatch.
    Pend,
    Running,
    /// Stopped running; success or failure is not known at this level.
    Finished,
    Succeed,
    Failed,
    Canceled,
}

impl JobState {
    /// Terminal for the purpose of container reuse.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Succeed | JobState::Failed | JobState::Canceled
        )
    }

    /// States nothing can leave.
    pub fn is_final(&self) -> bool {
        matches!(self, JobState::Succeed | JobState::Failed | JobState::Canceled)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Create => 0,
            JobState::Wait => 1,
            JobState::Pend => 2,
            JobState::Running => 3,
            JobState::Finished => 4,
            JobState::Succeed | JobState::Failed | JobState::Canceled => 5,
        }
    }

    /// Whether `next` is a legal forward step from `self`.
    ///
    /// Final states admit nothing. `Failed`/`Canceled` are reachable from any
    /// other state; everything else must move strictly forward.
    pub fn can_advance_to(&self, next: JobState) -> bool {
        if self.is_final() {
            return false;
        }
        match next {
            JobState::Failed | JobState::Canceled => true,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Create => "create",
            JobState::Wait => "wait",
            JobState::Pend => "pend",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Succeed => "succeed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a container job or task as reported by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Configuring,
    Submitted,
    Validating,
    ExternalValidation,
    Queued,
    Dispatching,
    Running,
    Finishing,
    Finished,
    Failed,
    Canceled,
    Canceling,
}

impl TaskState {
    pub const ALL: [TaskState; 12] = [
        TaskState::Configuring,
        TaskState::Submitted,
        TaskState::Validating,
        TaskState::ExternalValidation,
        TaskState::Queued,
        TaskState::Dispatching,
        TaskState::Running,
        TaskState::Finishing,
        TaskState::Finished,
        TaskState::Failed,
        TaskState::Canceled,
        TaskState::Canceling,
    ];

    /// A container in one of these states takes no more tasks.
    ///
    /// `Canceled` counts as closed too: a canceled container never runs
    /// another task, so it is not reused.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            TaskState::Finishing | TaskState::Finished | TaskState::Failed | TaskState::Canceled
        )
    }

    /// States a task is still doing (or about to do) work in.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskState::Running
                | TaskState::Queued
                | TaskState::Dispatching
                | TaskState::Submitted
                | TaskState::Validating
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Translate a scheduler state into the engine's lifecycle.
///
/// Success, failure and cancellation all land on `Finished`; use
/// [`settle_state`] when the outcome matters.
pub fn convert_state(state: TaskState) -> JobState {
    match state {
        TaskState::Running => JobState::Running,
        TaskState::Queued | TaskState::Dispatching | TaskState::Submitted => JobState::Pend,
        TaskState::Finishing
        | TaskState::Finished
        | TaskState::Canceled
        | TaskState::Failed
        | TaskState::Canceling => JobState::Finished,
        _ => JobState::Wait,
    }
}

/// Like [`convert_state`] but keeps the outcome of settled tasks apart.
pub fn settle_state(state: TaskState) -> JobState {
    match state {
        TaskState::Finished => JobState::Succeed,
        TaskState::Failed => JobState::Failed,
        TaskState::Canceled => JobState::Canceled,
        other => convert_state(other),
    }
}

/// Identity and run-time state of submitted work, owned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    /// `None` until the backend accepted the work.
    pub id: Option<TaskId>,
    pub state: JobState,
    /// Node the work ran (or runs) on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    /// Consumed CPU time in seconds.
    #[serde(default)]
    pub cpu_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_time: Option<DateTime<Utc>>,
    /// Backend-specific extras.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_info: HashMap<String, serde_json::Value>,
}

impl JobHandle {
    /// A handle for work the backend has accepted.
    pub fn submitted(id: TaskId, state: JobState) -> Self {
        Self {
            id: Some(id),
            state: if state == JobState::Create {
                JobState::Wait
            } else {
                state
            },
            submit_time: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Record the backend's id; moves the handle out of `Create`.
    pub fn assign(&mut self, id: TaskId) {
        self.id = Some(id);
        self.submit_time.get_or_insert_with(Utc::now);
        if self.state == JobState::Create {
            self.state = JobState::Wait;
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn advance(&mut self, next: JobState) -> bool {
        if next == self.state {
            return false;
        }
        if next == JobState::Create || !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn is_submitted(&self) -> bool {
        self.id.is_some()
    }
}
