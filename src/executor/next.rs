use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::Shared;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Flow, Invoker};
use crate::pipeline::{Context, FlowError, FlowResult};

type Waiter = Shared<oneshot::Receiver<FlowResult>>;

/// Memoized outcome of one continuation
enum Slot {
    Empty,
    /// The first call is still running downstream
    Executing(Waiter),
    Resolved(FlowResult),
}

/// Continuation handed to a middleware: "run everything after me"
///
/// The first call decides the outcome, failures included. A bare
/// [`Next::call`] runs the rest of the chain, while [`Next::call_with`] on a
/// fresh continuation resolves it without running anything. Every later call,
/// through this value or any clone of it, returns that first outcome without
/// running downstream middleware again.
#[derive(Clone)]
pub struct Next {
    invoker: Arc<Invoker>,
    next_idx: usize,
    slot: Arc<Mutex<Slot>>,
}

impl Next {
    pub(crate) fn new(invoker: Arc<Invoker>, next_idx: usize) -> Self {
        Self {
            invoker,
            next_idx,
            slot: Arc::new(Mutex::new(Slot::Empty)),
        }
    }

    /// True when there is no middleware left after the current one
    pub fn is_nop(&self) -> bool {
        self.next_idx >= self.invoker.len()
    }

    /// True once an outcome has been cached
    pub fn is_resolved(&self) -> bool {
        matches!(*self.lock(), Slot::Resolved(_))
    }

    /// Run the rest of the chain, or return the outcome of an earlier call
    ///
    /// While the first call is still suspended, later calls return a flow
    /// that completes when that first call does.
    pub fn call<'a>(&self, ctx: &'a mut Context) -> Flow<'a> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.lock();
            match &*slot {
                Slot::Resolved(outcome) => return Flow::ready(outcome.clone()),
                Slot::Executing(waiter) => return wait_for(waiter.clone()),
                Slot::Empty => *slot = Slot::Executing(rx.shared()),
            }
        }

        let completion = Completion {
            slot: Arc::clone(&self.slot),
            tx: Some(tx),
        };
        match self.invoker.run_middleware(self.next_idx, ctx).into_ready() {
            Ok(outcome) => Flow::ready(completion.finish(outcome)),
            Err(pending) => Flow::pending(async move {
                let outcome = pending.await;
                completion.finish(outcome)
            }),
        }
    }

    /// Resolve with `value` without running the rest of the chain
    ///
    /// Only the first resolution sticks: if an earlier call already decided
    /// the outcome, that outcome is returned and `value` is dropped. When
    /// that earlier call is still suspended, the returned flow completes
    /// together with it.
    pub fn call_with(&self, value: impl Into<Value>) -> Flow<'static> {
        let mut slot = self.lock();
        match &*slot {
            Slot::Resolved(outcome) => Flow::ready(outcome.clone()),
            Slot::Executing(waiter) => wait_for(waiter.clone()),
            Slot::Empty => {
                let outcome = Ok(value.into());
                *slot = Slot::Resolved(outcome.clone());
                Flow::ready(outcome)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn wait_for(waiter: Waiter) -> Flow<'static> {
    Flow::pending(async move { waiter.await.unwrap_or_else(|canceled| Err(FlowError::middleware(canceled))) })
}

/// Publishes the outcome of the call that claimed the slot
///
/// Dropped before finishing, it empties the slot again so a later call
/// starts downstream afresh; anyone waiting on it sees the cancellation.
struct Completion {
    slot: Arc<Mutex<Slot>>,
    tx: Option<oneshot::Sender<FlowResult>>,
}

impl Completion {
    fn finish(mut self, outcome: FlowResult) -> FlowResult {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Slot::Resolved(outcome.clone());
        if let Some(tx) = self.tx.take() {
            // no receiver left is fine
            let _ = tx.send(outcome.clone());
        }
        outcome
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.tx.is_none() {
            return;
        }
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*slot, Slot::Executing(_)) {
            *slot = Slot::Empty;
        }
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Next");
        debug.field("next_idx", &self.next_idx).field("is_nop", &self.is_nop());
        match &*self.lock() {
            Slot::Empty => debug.field("outcome", &None::<FlowResult>),
            Slot::Executing(_) => debug.field("outcome", &"<executing>"),
            Slot::Resolved(outcome) => debug.field("outcome", &Some(outcome)),
        };
        debug.finish()
    }
}
