//! Deferred calls and the in-process local queue backend.

use std::collections::VecDeque;

use farm_core::FarmError;
use serde_json::Value;

use crate::pipeline::Backend;
use crate::process::{ProcessCommand, run_reduce};

/// Outcome of one deferred call.
pub type OpResult = Result<(), String>;

/// A call captured for later execution.
pub enum DeferredCall {
    /// Takes no arguments.
    Unit(Box<dyn FnOnce() -> OpResult + Send>),
    /// Receives the state value captured at enqueue time.
    WithState(Box<dyn FnOnce(Value) -> OpResult + Send>, Value),
}

impl DeferredCall {
    pub fn unit<F>(f: F) -> Self
    where
        F: FnOnce() -> OpResult + Send + 'static,
    {
        DeferredCall::Unit(Box::new(f))
    }

    pub fn with_state<F>(f: F, state: Value) -> Self
    where
        F: FnOnce(Value) -> OpResult + Send + 'static,
    {
        DeferredCall::WithState(Box::new(f), state)
    }

    /// Consume the call and run it.
    pub fn invoke(self) -> OpResult {
        match self {
            DeferredCall::Unit(f) => f(),
            DeferredCall::WithState(f, state) => f(state),
        }
    }
}

impl std::fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferredCall::Unit(_) => f.write_str("DeferredCall::Unit"),
            DeferredCall::WithState(_, state) => write!(f, "DeferredCall::WithState({state})"),
        }
    }
}

/// FIFO of deferred calls shared by the in-process backends.
#[derive(Debug, Default)]
pub struct CallQueue {
    calls: VecDeque<DeferredCall>,
}

impl CallQueue {
    pub fn push(&mut self, call: DeferredCall) {
        self.calls.push_back(call);
    }

    pub fn pop(&mut self) -> Option<DeferredCall> {
        self.calls.pop_front()
    }

    /// Take every queued call, oldest first.
    pub fn take_all(&mut self) -> Vec<DeferredCall> {
        self.calls.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Runs deferred calls one after another on the caller's task.
#[derive(Debug, Default)]
pub struct SingleMachineComputation {
    queue: CallQueue,
    reduce: Option<ProcessCommand>,
}

impl SingleMachineComputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reduce(mut self, command: ProcessCommand) -> Self {
        self.reduce = Some(command);
        self
    }

    pub fn set_reduce(&mut self, command: ProcessCommand) {
        self.reduce = Some(command);
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

    /// Calls still waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Backend for SingleMachineComputation {
    fn name(&self) -> &'static str {
        "local-queue"
    }

    async fn initialize(&mut self) -> Result<bool, FarmError> {
        if self.queue.is_empty() {
            tracing::info!("Local queue is empty; nothing to run");
            return Ok(false);
        }
        tracing::debug!("Local queue holds {} call(s)", self.queue.len());
        Ok(true)
    }

    async fn broadcast(&mut self) -> Result<bool, FarmError> {
        let mut ran = 0usize;
        // Stops at the first failure; later calls stay queued.
        while let Some(call) = self.queue.pop() {
            ran += 1;
            if let Err(e) = call.invoke() {
                tracing::error!("Call #{} failed: {}", ran, e);
                return Err(FarmError::Operation(format!("call #{ran}: {e}")));
            }
        }
        tracing::info!("Ran {} queued call(s)", ran);
        Ok(true)
    }

    async fn reduce(&mut self) -> Result<bool, FarmError> {
        run_reduce(self.reduce.as_ref()).await
    }
}
