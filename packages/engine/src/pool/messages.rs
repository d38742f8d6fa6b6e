//! Message types for the worker pool.

use ractor::RpcReplyPort;

use crate::local::{DeferredCall, OpResult};

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run one deferred call and reply with its outcome.
    Run {
        /// Position of the call in the drained queue.
        seq: usize,
        call: DeferredCall,
        reply: RpcReplyPort<OpResult>,
    },

    /// Shutdown the worker.
    Shutdown,
}
