//! The four-phase pipeline and the backend contract it drives.

use chrono::Utc;
use farm_core::{FarmError, FarmEvent, Phase, PipelineResult, RunId};
use tokio::sync::broadcast;
use tracing::Instrument;

/// A compute backend the engine can drive.
///
/// Each phase returns `Ok(false)` to stop the pipeline quietly. Errors are
/// sorted by the engine: operational ones become a failed phase, the rest
/// abort the run.
pub trait Backend: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Check that there is work to do and the backend can take it.
    fn initialize(&mut self) -> impl Future<Output = Result<bool, FarmError>> + Send;

    /// Dispatch the work and wait for it to complete.
    fn broadcast(&mut self) -> impl Future<Output = Result<bool, FarmError>> + Send;

    /// Post-dispatch step, usually a local aggregation command.
    fn reduce(&mut self) -> impl Future<Output = Result<bool, FarmError>> + Send {
        async { Ok(true) }
    }

    /// Final check of the run's outcome.
    fn validate_result(&mut self) -> impl Future<Output = Result<bool, FarmError>> + Send {
        async { Ok(true) }
    }
}

/// Orchestration engine bound to one backend.
pub struct ParallelComputation<B> {
    backend: B,
    event_tx: Option<broadcast::Sender<FarmEvent>>,
    inner_error: Option<FarmError>,
}

impl<B: Backend> ParallelComputation<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            event_tx: None,
            inner_error: None,
        }
    }

    /// Set the event broadcaster.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<FarmEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// First failure captured by the most recent run.
    pub fn inner_error(&self) -> Option<&FarmError> {
        self.inner_error.as_ref()
    }

    /// Run Initialize, Broadcast, Reduce and Validate, stopping at the first
    /// phase that returns false.
    pub async fn execute(&mut self) -> Result<PipelineResult, FarmError> {
        let run_id = RunId::new();
        let span = tracing::info_span!("pipeline", %run_id, backend = self.backend.name());
        self.run(run_id).instrument(span).await
    }

    async fn run(&mut self, run_id: RunId) -> Result<PipelineResult, FarmError> {
        let mut result = PipelineResult::new(run_id);
        self.inner_error = None;

        for phase in Phase::ALL {
            self.emit(FarmEvent::PhaseStarted {
                run_id,
                phase,
                timestamp: Utc::now(),
            });

            let outcome = match phase {
                Phase::Initialize => self.backend.initialize().await,
                Phase::Broadcast => self.backend.broadcast().await,
                Phase::Reduce => self.backend.reduce().await,
                Phase::Validate => self.backend.validate_result().await,
            };

            let ok = match outcome {
                Ok(ok) => ok,
                Err(e) if e.is_operational() => {
                    tracing::error!("{} phase failed: {}", phase, e);
                    result.capture(e);
                    false
                }
                Err(e) => {
                    tracing::error!("{} phase aborted the run: {}", phase, e);
                    self.inner_error = Some(e.clone());
                    return Err(e);
                }
            };

            result.record(phase, ok);
            self.emit(FarmEvent::PhaseFinished {
                run_id,
                phase,
                ok,
                timestamp: Utc::now(),
            });

            if !ok {
                tracing::info!("Pipeline stopped after {}", phase);
                break;
            }
        }

        if result.succeeded() {
            tracing::info!("Pipeline succeeded");
        }
        self.inner_error = result.inner_error.clone();
        Ok(result)
    }

    fn emit(&self, event: FarmEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}
