//! Event types published while a pipeline runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::container::{ContainerId, ContainerKey};
use crate::result::{Phase, RunId};
use crate::state::JobState;
use crate::task::TaskId;

/// Events emitted by the engine and the remote farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FarmEvent {
    // Pipeline events
    /// A phase is about to run.
    PhaseStarted {
        run_id: RunId,
        phase: Phase,
        timestamp: DateTime<Utc>,
    },
    /// A phase returned.
    PhaseFinished {
        run_id: RunId,
        phase: Phase,
        ok: bool,
        timestamp: DateTime<Utc>,
    },

    // Remote farm events
    /// A new container job was created on the scheduler.
    ContainerCreated {
        container_id: ContainerId,
        key: ContainerKey,
        timestamp: DateTime<Utc>,
    },
    /// A sweep task was accepted by the scheduler.
    TaskSubmitted {
        container_id: ContainerId,
        task_id: TaskId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// A sweep task was canceled.
    TaskKilled {
        container_id: ContainerId,
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    /// Waiting for completion ended.
    WaitFinished {
        state: JobState,
        timestamp: DateTime<Utc>,
    },
}

impl FarmEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            FarmEvent::PhaseStarted { timestamp, .. } => *timestamp,
            FarmEvent::PhaseFinished { timestamp, .. } => *timestamp,
            FarmEvent::ContainerCreated { timestamp, .. } => *timestamp,
            FarmEvent::TaskSubmitted { timestamp, .. } => *timestamp,
            FarmEvent::TaskKilled { timestamp, .. } => *timestamp,
            FarmEvent::WaitFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the pipeline run this event belongs to, if any.
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            FarmEvent::PhaseStarted { run_id, .. } => Some(*run_id),
            FarmEvent::PhaseFinished { run_id, .. } => Some(*run_id),
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            FarmEvent::PhaseStarted { run_id, phase, .. } => {
                format!("Run {} entering {}", run_id, phase)
            }
            FarmEvent::PhaseFinished {
                run_id, phase, ok, ..
            } => {
                let outcome = if *ok { "ok" } else { "failed" };
                format!("Run {} {} {}", run_id, phase, outcome)
            }
            FarmEvent::ContainerCreated {
                container_id, key, ..
            } => format!("Container {} created for {}", container_id, key),
            FarmEvent::TaskSubmitted {
                container_id,
                task_id,
                name,
                ..
            } => format!("Task {} ({}) submitted to {}", task_id, name, container_id),
            FarmEvent::TaskKilled {
                container_id,
                task_id,
                ..
            } => format!("Task {} in {} canceled", task_id, container_id),
            FarmEvent::WaitFinished { state, .. } => format!("Wait finished: {}", state),
        }
    }
}
