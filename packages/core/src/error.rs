//! Error type shared by every platform.

use std::path::PathBuf;
use std::time::Duration;

use crate::state::JobState;

/// Errors raised by the engine and its backends.
///
/// Operational failures (see [`FarmError::is_operational`]) are turned into a
/// failed phase by the engine; everything else is a contract violation or a
/// timeout and propagates out of `execute()`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FarmError {
    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(
        "Invalid sweep range for task '{task}': start {start}, end {end}, increment {increment}"
    )]
    InvalidRange {
        task: String,
        start: i64,
        end: i64,
        increment: i64,
    },

    #[error("{task} cannot run on the {platform} platform")]
    TypeMismatch {
        platform: &'static str,
        task: &'static str,
    },

    #[error("Scheduler error: {0}")]
    Backend(String),

    #[error("Timed out after {waited:?} waiting for {} done file(s)", .missing.len())]
    Timeout {
        waited: Duration,
        missing: Vec<PathBuf>,
    },

    #[error("Job ended as {0} before its done files appeared")]
    JobAborted(JobState),

    #[error("Tasks did not succeed: {}", .0.join(", "))]
    TasksFailed(Vec<String>),

    #[error("Deferred operation failed: {0}")]
    Operation(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl FarmError {
    /// Failures the engine reports as a failed phase instead of propagating.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            FarmError::Backend(_)
                | FarmError::JobAborted(_)
                | FarmError::TasksFailed(_)
                | FarmError::Operation(_)
                | FarmError::Process(_)
                | FarmError::Pool(_)
                | FarmError::Io(_)
        )
    }
}

impl From<std::io::Error> for FarmError {
    fn from(e: std::io::Error) -> Self {
        FarmError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violations_are_not_operational() {
        let errors = [
            FarmError::InvalidPlatform("gpu".into()),
            FarmError::Configuration("bad".into()),
            FarmError::InvalidRange {
                task: "t".into(),
                start: 2,
                end: 1,
                increment: 1,
            },
            FarmError::TypeMismatch {
                platform: "local-queue",
                task: "sweep task",
            },
            FarmError::Timeout {
                waited: Duration::from_secs(1),
                missing: vec![],
            },
        ];
        for e in errors {
            assert!(!e.is_operational(), "{e}");
        }
        assert!(FarmError::Backend("down".into()).is_operational());
    }

    #[test]
    fn timeout_message_counts_missing_files() {
        let e = FarmError::Timeout {
            waited: Duration::from_secs(10),
            missing: vec![PathBuf::from("a.done"), PathBuf::from("b.done")],
        };
        assert_eq!(e.to_string(), "Timed out after 10s waiting for 2 done file(s)");
    }
}
