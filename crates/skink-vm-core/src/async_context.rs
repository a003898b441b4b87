//! Suspended-execution state
//!
//! When an `Await` hits a pending promise the interpreter pops the
//! awaiting frame and boxes it here: all scope slots, the resume PC and
//! the destination slot for the settled value. The host parks the context
//! on the awaited promise and re-enqueues it as a `Resume` job when the
//! promise settles.

use std::sync::Arc;

use skink_vm_bytecode::ScopeIndex;

use crate::context::Frame;
use crate::promise::JsPromise;
use crate::value::Value;

/// A suspended frame waiting on a promise
pub struct AsyncContext {
    /// The captured frame (owns its scope slots and resume PC)
    pub frame: Frame,
    /// Where the settled value lands before dispatch resumes
    pub resume_slot: ScopeIndex,
    /// The promise the suspended function will eventually settle
    pub result_promise: Arc<JsPromise>,
    /// The promise being awaited
    pub awaited: Arc<JsPromise>,
}

impl std::fmt::Debug for AsyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncContext")
            .field("pc", &self.frame.pc)
            .field("resume_slot", &self.resume_slot)
            .finish()
    }
}

/// Outcome of driving the interpreter
#[derive(Debug)]
pub enum RunOutcome {
    /// The top frame returned this completion value
    Complete(Value),
    /// Execution reached a suspension point at the top level; the host
    /// resumes via the job queue
    Suspended(AsyncContext),
}

impl RunOutcome {
    /// The completion value when finished
    pub fn value(self) -> Option<Value> {
        match self {
            Self::Complete(v) => Some(v),
            Self::Suspended(_) => None,
        }
    }

    /// Whether execution is parked
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended(_))
    }
}
