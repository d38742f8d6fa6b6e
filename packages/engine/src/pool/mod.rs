//! Multi-worker backend: deferred calls spread over a pool of worker actors.

mod messages;
mod worker_actor;

pub use messages::WorkerMessage;
pub use worker_actor::{WorkerActor, WorkerActorState, WorkerArgs};

use farm_core::FarmError;
use futures_util::future::join_all;
use ractor::{Actor, ActorRef};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::local::{CallQueue, DeferredCall, OpResult};
use crate::pipeline::Backend;
use crate::process::{ProcessCommand, run_reduce};

struct Worker {
    actor: ActorRef<WorkerMessage>,
    handle: JoinHandle<()>,
}

/// Runs deferred calls concurrently on a fixed-size pool.
///
/// Same queue contract as the local backend, but Broadcast lets every call
/// run and reports the first failure in enqueue order.
#[derive(Debug)]
pub struct MultiWorkerComputation {
    queue: CallQueue,
    workers: usize,
    reduce: Option<ProcessCommand>,
}

impl MultiWorkerComputation {
    pub fn new(workers: usize) -> Self {
        Self {
            queue: CallQueue::default(),
            workers: workers.max(1),
            reduce: None,
        }
    }

    pub fn with_reduce(mut self, command: ProcessCommand) -> Self {
        self.reduce = Some(command);
        self
    }

    pub fn set_reduce(&mut self, command: ProcessCommand) {
        self.reduce = Some(command);
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue a call with no arguments.
    pub fn enqueue_method<F>(&mut self, f: F)
    where
        F: FnOnce() -> OpResult + Send + 'static,
    {
        self.queue.push(DeferredCall::unit(f));
    }

    /// Queue a call that receives `state` when it runs.
    pub fn enqueue_method_with<F>(&mut self, f: F, state: Value)
    where
        F: FnOnce(Value) -> OpResult + Send + 'static,
    {
        self.queue.push(DeferredCall::with_state(f, state));
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Backend for MultiWorkerComputation {
    fn name(&self) -> &'static str {
        "multi-worker"
    }

    async fn initialize(&mut self) -> Result<bool, FarmError> {
        if self.queue.is_empty() {
            tracing::info!("Worker queue is empty; nothing to run");
            return Ok(false);
        }
        Ok(true)
    }

    async fn broadcast(&mut self) -> Result<bool, FarmError> {
        let calls = self.queue.take_all();
        let size = self.workers.min(calls.len()).max(1);
        tracing::info!("Running {} call(s) on {} worker(s)", calls.len(), size);

        let pool = spawn_pool(size).await?;
        let outcomes = run_on_pool(&pool, calls).await;
        shutdown_pool(pool).await;

        let mut first_failure = None;
        let mut failures = 0usize;
        for (seq, outcome) in outcomes?.into_iter().enumerate() {
            if let Err(e) = outcome {
                failures += 1;
                first_failure.get_or_insert_with(|| format!("call #{}: {}", seq + 1, e));
            }
        }

        match first_failure {
            Some(msg) => {
                tracing::error!("{} call(s) failed; first was {}", failures, msg);
                Err(FarmError::Operation(msg))
            }
            None => Ok(true),
        }
    }

    async fn reduce(&mut self) -> Result<bool, FarmError> {
        run_reduce(self.reduce.as_ref()).await
    }
}

async fn spawn_pool(size: usize) -> Result<Vec<Worker>, FarmError> {
    let mut pool = Vec::with_capacity(size);
    for i in 0..size {
        let args = WorkerArgs {
            worker_id: format!("worker-{}", i + 1),
        };
        match Actor::spawn(None, WorkerActor, args).await {
            Ok((actor, handle)) => pool.push(Worker { actor, handle }),
            Err(e) => {
                shutdown_pool(pool).await;
                return Err(FarmError::Pool(format!("failed to spawn worker: {e}")));
            }
        }
    }
    Ok(pool)
}

/// Hand calls out round-robin and collect every reply, in enqueue order.
async fn run_on_pool(pool: &[Worker], calls: Vec<DeferredCall>) -> Result<Vec<OpResult>, FarmError> {
    let mut replies = Vec::with_capacity(calls.len());
    for (seq, call) in calls.into_iter().enumerate() {
        let worker = &pool[seq % pool.len()];
        let (tx, rx) = ractor::concurrency::oneshot();
        worker
            .actor
            .send_message(WorkerMessage::Run {
                seq,
                call,
                reply: tx.into(),
            })
            .map_err(|_| {
                FarmError::Pool(format!("worker {} stopped accepting calls", worker.actor.get_id()))
            })?;
        replies.push(rx);
    }

    Ok(join_all(replies)
        .await
        .into_iter()
        .enumerate()
        .map(|(seq, reply)| {
            reply.unwrap_or_else(|_| Err(format!("worker dropped call #{}", seq + 1)))
        })
        .collect())
}

async fn shutdown_pool(pool: Vec<Worker>) {
    for worker in pool {
        if worker.actor.send_message(WorkerMessage::Shutdown).is_err() {
            worker.actor.stop(None);
        }
        if let Err(e) = worker.handle.await {
            tracing::warn!("Worker exited abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn every_call_runs_exactly_once() -> Result<(), FarmError> {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut multi = MultiWorkerComputation::new(3);
        for i in 0..10 {
            let c = counter.clone();
            multi.enqueue_method_with(
                move |state| {
                    assert_eq!(state["i"], json!(i));
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                json!({"i": i}),
            );
        }

        assert!(multi.initialize().await?);
        assert!(multi.broadcast().await?);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(multi.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn first_failure_in_enqueue_order_is_reported() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut multi = MultiWorkerComputation::new(2);
        for i in 0..6 {
            let r = ran.clone();
            multi.enqueue_method(move || {
                r.fetch_add(1, Ordering::SeqCst);
                match i {
                    2 => Err("bad frame".to_string()),
                    4 => Err("worse frame".to_string()),
                    _ => Ok(()),
                }
            });
        }

        let err = multi.broadcast().await;
        assert!(matches!(err, Err(FarmError::Operation(msg)) if msg == "call #3: bad frame"));
        // Unlike the local queue, the rest of the batch still ran.
        assert_eq!(ran.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn panicking_call_is_a_failure() {
        let mut multi = MultiWorkerComputation::new(1);
        multi.enqueue_method(|| panic!("boom"));
        let err = multi.broadcast().await;
        assert!(matches!(err, Err(FarmError::Operation(msg)) if msg.contains("panicked")));
    }

    #[test]
    fn pool_size_is_at_least_one() {
        assert_eq!(MultiWorkerComputation::new(0).workers(), 1);
    }
}
