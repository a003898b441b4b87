//! Promises and the pending-job queue
//!
//! A promise is a settle-once state machine with parked reactions. The
//! reactions never run script directly: they enqueue [`PromiseJob`]s that
//! the host drains between macro-events, preserving FIFO registration
//! order (the microtask guarantee).

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::async_context::AsyncContext;
use crate::value::Value;

/// Promise state
#[derive(Debug, Clone)]
pub enum PromiseState {
    /// Not yet settled
    Pending,
    /// Resolved with a value
    Fulfilled(Value),
    /// Rejected with a reason
    Rejected(Value),
}

/// Settlement delivered to a parked reaction
pub type Settlement = Result<Value, Value>;

type Reaction = Box<dyn FnOnce(Settlement) + Send>;

/// A promise
pub struct JsPromise {
    state: Mutex<PromiseState>,
    reactions: Mutex<Vec<Reaction>>,
    /// A rejection handler has been attached
    handled: AtomicBool,
}

impl JsPromise {
    /// Create a pending promise
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Pending),
            reactions: Mutex::new(Vec::new()),
            handled: AtomicBool::new(false),
        })
    }

    /// Create an already-fulfilled promise
    pub fn fulfilled(value: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Fulfilled(value)),
            reactions: Mutex::new(Vec::new()),
            handled: AtomicBool::new(false),
        })
    }

    /// Create an already-rejected promise
    pub fn rejected_with(reason: Value) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PromiseState::Rejected(reason)),
            reactions: Mutex::new(Vec::new()),
            handled: AtomicBool::new(false),
        })
    }

    /// Fulfil the promise; drains parked reactions in registration order
    pub fn resolve(&self, value: Value) {
        let reactions = {
            let mut state = self.state.lock();
            if !matches!(*state, PromiseState::Pending) {
                return;
            }
            *state = PromiseState::Fulfilled(value.clone());
            std::mem::take(&mut *self.reactions.lock())
        };
        for reaction in reactions {
            reaction(Ok(value.clone()));
        }
    }

    /// Reject the promise; drains parked reactions in registration order
    pub fn reject(&self, reason: Value) {
        let reactions = {
            let mut state = self.state.lock();
            if !matches!(*state, PromiseState::Pending) {
                return;
            }
            *state = PromiseState::Rejected(reason.clone());
            std::mem::take(&mut *self.reactions.lock())
        };
        for reaction in reactions {
            reaction(Err(reason.clone()));
        }
    }

    /// Park a reaction; fires immediately when already settled
    pub fn on_settle<F>(&self, reaction: F)
    where
        F: FnOnce(Settlement) + Send + 'static,
    {
        let state = self.state.lock().clone();
        match state {
            PromiseState::Pending => self.reactions.lock().push(Box::new(reaction)),
            PromiseState::Fulfilled(value) => reaction(Ok(value)),
            PromiseState::Rejected(reason) => reaction(Err(reason)),
        }
    }

    /// Current state
    pub fn state(&self) -> PromiseState {
        self.state.lock().clone()
    }

    /// Whether still pending
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), PromiseState::Pending)
    }

    /// Whether rejected
    pub fn is_rejected(&self) -> bool {
        matches!(*self.state.lock(), PromiseState::Rejected(_))
    }

    /// Fulfilment value, if fulfilled
    pub fn value(&self) -> Option<Value> {
        match &*self.state.lock() {
            PromiseState::Fulfilled(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Rejection reason, if rejected
    pub fn reason(&self) -> Option<Value> {
        match &*self.state.lock() {
            PromiseState::Rejected(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Record that a rejection handler was attached
    pub fn mark_handled(&self) {
        self.handled.store(true, Ordering::Relaxed);
    }

    /// Whether a rejection handler was ever attached
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for JsPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.state.lock() {
            PromiseState::Pending => write!(f, "Promise {{ <pending> }}"),
            PromiseState::Fulfilled(v) => write!(f, "Promise {{ <fulfilled>: {v:?} }}"),
            PromiseState::Rejected(v) => write!(f, "Promise {{ <rejected>: {v:?} }}"),
        }
    }
}

/// A unit of deferred script work
pub enum PromiseJob {
    /// Call a reaction callback, settling `derived` with the outcome
    Reaction {
        /// Script callback (may be a non-function; then the settlement
        /// passes through unchanged)
        callback: Value,
        /// Settlement delivered to the callback
        settlement: Settlement,
        /// Promise settled from the callback's result
        derived: Arc<JsPromise>,
    },
    /// Resume a suspended frame with its awaited settlement
    Resume {
        /// The captured frame and bookkeeping
        context: AsyncContext,
        /// Value or rejection to deliver at the await site
        settlement: Settlement,
    },
}

impl std::fmt::Debug for PromiseJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reaction { .. } => write!(f, "Reaction"),
            Self::Resume { .. } => write!(f, "Resume"),
        }
    }
}

/// FIFO queue of pending jobs, drained by the host between macro-events
#[derive(Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<PromiseJob>>,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job
    pub fn enqueue(&self, job: PromiseJob) {
        self.jobs.lock().push_back(job);
    }

    /// Take the next job
    pub fn dequeue(&self) -> Option<PromiseJob> {
        self.jobs.lock().pop_front()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_settle_once() {
        let p = JsPromise::new();
        p.resolve(Value::number(1.0));
        p.reject(Value::number(2.0));
        assert_eq!(p.value(), Some(Value::number(1.0)));
        assert!(!p.is_rejected());
    }

    #[test]
    fn test_reactions_fifo() {
        let p = JsPromise::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            p.on_settle(move |_| order.lock().push(i));
        }
        p.resolve(Value::undefined());
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_settled_reaction_fires_immediately() {
        let p = JsPromise::rejected_with(Value::string("boom"));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        p.on_settle(move |outcome| {
            assert!(outcome.is_err());
            fired2.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_job_queue_order() {
        let q = JobQueue::new();
        for i in 0..3 {
            q.enqueue(PromiseJob::Reaction {
                callback: Value::number(i as f64),
                settlement: Ok(Value::undefined()),
                derived: JsPromise::new(),
            });
        }
        let mut seen = Vec::new();
        while let Some(job) = q.dequeue() {
            if let PromiseJob::Reaction { callback, .. } = job {
                seen.push(callback.as_number().unwrap() as i32);
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
