//! Worker actor for executing deferred calls.

use ractor::{Actor, ActorProcessingErr, ActorRef};

use super::messages::WorkerMessage;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Calls this worker has finished, successful or not.
    pub completed: usize,
    pub failed: usize,
}

impl WorkerActorState {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            completed: 0,
            failed: 0,
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
}

/// Worker actor that runs deferred calls on the blocking pool.
///
/// Calls sent to one worker run in the order they were sent.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState::new(args.worker_id))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Run { seq, call, reply } => {
                // Deferred calls are plain blocking closures.
                let outcome = match tokio::task::spawn_blocking(move || call.invoke()).await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(format!("call panicked: {e}")),
                };

                state.completed += 1;
                if let Err(ref e) = outcome {
                    state.failed += 1;
                    tracing::warn!("Worker {} call #{} failed: {}", state.worker_id, seq + 1, e);
                }

                // The caller may have stopped listening; nothing to do then.
                let _ = reply.send(outcome);
            }

            WorkerMessage::Shutdown => {
                tracing::debug!(
                    "Shutting down worker {} after {} call(s), {} failed",
                    state.worker_id,
                    state.completed,
                    state.failed
                );
                myself.stop(None);
            }
        }

        Ok(())
    }
}
