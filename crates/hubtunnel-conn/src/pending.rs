use std::collections::HashMap;

use bytes::Bytes;
use hubtunnel_frame::{CompletionMessage, CompletionOutcome};
use tokio::sync::oneshot;

use crate::error::{ConnectionError, Result};

/// `None` when the hub method returned nothing.
pub(crate) type InvocationResult = Result<Option<Bytes>>;

/// Invocations waiting for their completion, keyed by invocation id.
#[derive(Default)]
pub(crate) struct PendingInvocations {
    waiters: HashMap<String, oneshot::Sender<InvocationResult>>,
}

impl PendingInvocations {
    pub(crate) fn insert(&mut self, invocation_id: String) -> oneshot::Receiver<InvocationResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(invocation_id, tx);
        rx
    }

    pub(crate) fn remove(&mut self, invocation_id: &str) -> bool {
        self.waiters.remove(invocation_id).is_some()
    }

    /// Resolve the waiter for `completion`. Returns false for unknown ids.
    pub(crate) fn complete(&mut self, completion: CompletionMessage) -> bool {
        let Some(waiter) = self.waiters.remove(&completion.invocation_id) else {
            return false;
        };
        let result = match completion.outcome {
            CompletionOutcome::Error(message) => Err(ConnectionError::Hub(message)),
            CompletionOutcome::Void => Ok(None),
            CompletionOutcome::Result(value) => Ok(Some(value)),
        };
        // the caller may have given up already
        let _ = waiter.send(result);
        true
    }

    /// Fail every waiter with a fresh error from `error`.
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> ConnectionError) -> usize {
        let count = self.waiters.len();
        for (_, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(error()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}
