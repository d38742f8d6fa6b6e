//! Sweep task domain types for dispatched work.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FarmError;
use crate::state::JobHandle;

/// Backend-assigned identifier of a single task.
pub type TaskId = i64;

/// Placeholder replaced by the sweep index when a command is expanded.
pub const SWEEP_PLACEHOLDER: char = '*';

/// Priority level a sweep task asks the scheduler for.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Lowest = 0,
    BelowNormal = 1,
    #[default]
    Normal = 2,
    AboveNormal = 3,
    Highest = 4,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Priority; 5] = [
        Priority::Lowest,
        Priority::BelowNormal,
        Priority::Normal,
        Priority::AboveNormal,
        Priority::Highest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Lowest => "lowest",
            Priority::BelowNormal => "below_normal",
            Priority::Normal => "normal",
            Priority::AboveNormal => "above_normal",
            Priority::Highest => "highest",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized || p.as_str().replace('_', "") == normalized)
            .ok_or_else(|| FarmError::Configuration(format!("unknown priority '{s}'")))
    }
}

/// One parametric unit of dispatched work.
///
/// The range `start_value..=end_value` stepped by `increment_value` is expanded
/// by the backend (or locally, see [`SweepTask::expand_commands`]). The caller
/// builds the task before a pipeline run; the backend only writes `handle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepTask {
    /// Invocation template; `*` stands for the sweep index.
    pub command: String,
    /// Display name of the task on the scheduler.
    pub name: String,
    /// Where the task's stdout/stderr are redirected, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// Reserve a whole node instead of sharing cores.
    pub exclusive: bool,
    pub start_value: i64,
    pub end_value: i64,
    pub increment_value: i64,
    pub priority: Priority,
    /// Owner the container job is looked up under.
    pub owner: String,
    /// Ordered placement hint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_nodes: Vec<String>,
    /// Identity and run-time state, filled in by the backend.
    #[serde(default)]
    pub handle: JobHandle,
}

impl SweepTask {
    /// Create a task over `start..=end` with a step of one and normal priority.
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        start_value: i64,
        end_value: i64,
    ) -> Self {
        Self {
            command: command.into(),
            name: name.into(),
            log_path: None,
            exclusive: false,
            start_value,
            end_value,
            increment_value: 1,
            priority: Priority::default(),
            owner: String::new(),
            requested_nodes: Vec::new(),
            handle: JobHandle::default(),
        }
    }

    /// Set the sweep step.
    pub fn with_increment(mut self, increment_value: i64) -> Self {
        self.increment_value = increment_value;
        self
    }

    /// Set the priority for this task.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Reserve whole nodes for this task.
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Redirect the task's output to `path`.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Set the owner the container job is keyed by.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Ask the scheduler to place the task on these nodes, in order.
    pub fn with_requested_nodes(mut self, nodes: Vec<String>) -> Self {
        self.requested_nodes = nodes;
        self
    }

    /// Check the range invariant: `start ≤ end` and `increment > 0`.
    pub fn validate(&self) -> Result<(), FarmError> {
        if self.start_value > self.end_value || self.increment_value <= 0 {
            return Err(FarmError::InvalidRange {
                task: self.name.clone(),
                start: self.start_value,
                end: self.end_value,
                increment: self.increment_value,
            });
        }
        Ok(())
    }

    /// Sweep indices in ascending order. Empty when the range is invalid.
    pub fn indices(&self) -> impl Iterator<Item = i64> + use<> {
        let (start, end, step) = (self.start_value, self.end_value, self.increment_value);
        let valid = start <= end && step > 0;
        std::iter::successors(valid.then_some(start), move |i| {
            i.checked_add(step).filter(|next| *next <= end)
        })
    }

    /// Number of work units the sweep expands to.
    pub fn unit_count(&self) -> usize {
        self.indices().count()
    }

    /// Expand the command template once per index, replacing every `*`.
    pub fn expand_commands(&self) -> Vec<(i64, String)> {
        self.indices()
            .map(|i| {
                let cmd = self
                    .command
                    .replace(SWEEP_PLACEHOLDER, &i.to_string());
                (i, cmd)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_inverted_range() {
        let task = SweepTask::new("render", "render.exe *", 10, 1);
        assert!(matches!(
            task.validate(),
            Err(FarmError::InvalidRange { start: 10, end: 1, .. })
        ));
    }

    #[test]
    fn validate_rejects_non_positive_increment() {
        let task = SweepTask::new("render", "render.exe *", 1, 10).with_increment(0);
        assert!(task.validate().is_err());
        assert_eq!(task.unit_count(), 0);
    }

    #[test]
    fn single_value_range_is_valid() {
        let task = SweepTask::new("one", "run *", 7, 7);
        assert!(task.validate().is_ok());
        assert_eq!(task.indices().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn expand_commands_steps_through_inclusive_range() {
        let task = SweepTask::new("frames", "render --frame * --out f*.png", 1, 7).with_increment(3);
        let expanded = task.expand_commands();
        assert_eq!(
            expanded,
            vec![
                (1, "render --frame 1 --out f1.png".to_string()),
                (4, "render --frame 4 --out f4.png".to_string()),
                (7, "render --frame 7 --out f7.png".to_string()),
            ]
        );
    }

    #[test]
    fn indices_stop_before_overflow() {
        let task = SweepTask::new("edge", "x", i64::MAX - 1, i64::MAX).with_increment(5);
        assert_eq!(task.indices().collect::<Vec<_>>(), vec![i64::MAX - 1]);
    }

    #[test]
    fn priority_parses_loose_spellings() {
        assert_eq!("AboveNormal".parse::<Priority>().ok(), Some(Priority::AboveNormal));
        assert_eq!("below-normal".parse::<Priority>().ok(), Some(Priority::BelowNormal));
        assert_eq!("highest".parse::<Priority>().ok(), Some(Priority::Highest));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn new_task_has_unsubmitted_handle() {
        let task = SweepTask::new("t", "x", 0, 1);
        assert_eq!(task.handle.id, None);
        assert_eq!(task.handle.state, crate::JobState::Create);
    }
}
