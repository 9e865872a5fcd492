//! Resolve-once completion latch.

use std::sync::Arc;

use parking_lot::Mutex;
use quire_types::{LedgerId, ResponseBody, ResultCode};

use crate::executor::OrderedExecutor;

/// Boxed completion invoked with the outcome of one request.
pub(crate) type CompletionFn = Box<dyn FnOnce(ResultCode, ResponseBody) + Send + 'static>;

/// Single-shot completion shared by every path that may finish a request.
///
/// The first [`resolve`](Self::resolve) runs the callback; later calls are
/// no-ops that return `false`. A timeout racing a late response therefore
/// completes the request exactly once.
#[derive(Clone)]
pub(crate) struct Completion {
    slot: Arc<Mutex<Option<CompletionFn>>>,
}

impl Completion {
    pub(crate) fn new<F>(callback: F) -> Self
    where
        F: FnOnce(ResultCode, ResponseBody) + Send + 'static,
    {
        Self { slot: Arc::new(Mutex::new(Some(Box::new(callback)))) }
    }

    /// Runs the callback if nothing has resolved it yet.
    pub(crate) fn resolve(&self, rc: ResultCode, body: ResponseBody) -> bool {
        let callback = self.slot.lock().take();
        match callback {
            Some(callback) => {
                callback(rc, body);
                true
            },
            None => false,
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").field("resolved", &self.is_resolved()).finish()
    }
}

/// Completes `completion` on the executor worker owning `ledger_id`.
///
/// When the executor no longer accepts work the completion runs inline with
/// [`ResultCode::Interrupted`] instead of `rc`.
pub(crate) fn deliver(
    executor: &OrderedExecutor,
    ledger_id: LedgerId,
    completion: Completion,
    rc: ResultCode,
    body: ResponseBody,
) {
    let queued = completion.clone();
    if executor
        .submit_ordered(ledger_id.value(), move || {
            queued.resolve(rc, body);
        })
        .is_err()
    {
        tracing::debug!(ledger_id = %ledger_id, rc = %rc, "executor rejected completion");
        completion.resolve(ResultCode::Interrupted, ResponseBody::Empty);
    }
}
