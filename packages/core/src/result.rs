//! Pipeline phases and the per-run result.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::FarmError;

/// Unique identifier for one `execute()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Create a new unique run ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a run ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four fixed pipeline phases, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initialize,
    Broadcast,
    Reduce,
    Validate,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Initialize,
        Phase::Broadcast,
        Phase::Reduce,
        Phase::Validate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initialize => "initialize",
            Phase::Broadcast => "broadcast",
            Phase::Reduce => "reduce",
            Phase::Validate => "validate",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub run_id: RunId,
    /// `None` for phases that never ran.
    pub initialize: Option<bool>,
    pub broadcast: Option<bool>,
    pub reduce: Option<bool>,
    pub validate: Option<bool>,
    /// First failure captured during the run.
    pub inner_error: Option<FarmError>,
}

impl PipelineResult {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            initialize: None,
            broadcast: None,
            reduce: None,
            validate: None,
            inner_error: None,
        }
    }

    /// True only when every phase ran and returned true.
    pub fn succeeded(&self) -> bool {
        Phase::ALL.iter().all(|p| self.phase(*p) == Some(true))
    }

    pub fn phase(&self, phase: Phase) -> Option<bool> {
        match phase {
            Phase::Initialize => self.initialize,
            Phase::Broadcast => self.broadcast,
            Phase::Reduce => self.reduce,
            Phase::Validate => self.validate,
        }
    }

    pub fn record(&mut self, phase: Phase, ok: bool) {
        let slot = match phase {
            Phase::Initialize => &mut self.initialize,
            Phase::Broadcast => &mut self.broadcast,
            Phase::Reduce => &mut self.reduce,
            Phase::Validate => &mut self.validate,
        };
        *slot = Some(ok);
    }

    /// Keep `error` unless an earlier failure was already captured.
    pub fn capture(&mut self, error: FarmError) {
        if self.inner_error.is_none() {
            self.inner_error = Some(error);
        }
    }

    /// The phase that stopped the run, if any.
    pub fn failed_phase(&self) -> Option<Phase> {
        Phase::ALL
            .into_iter()
            .find(|p| self.phase(*p) == Some(false))
    }
}
