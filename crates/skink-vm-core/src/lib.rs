//! # Skink VM core
//!
//! The value model, property-resolution protocol and bytecode interpreter
//! of the skink scripting engine, plus the intrinsics they rest on.
//!
//! One VM instance is strictly single-threaded cooperative: a
//! [`context::VmContext`] runs the dispatch loop, suspends at `await`
//! points, and the host drains the [`promise::JobQueue`] between
//! macro-events. Shared per-VM state (realm, arena accounting, module
//! table, symbol registry) lives in [`state::VmState`] behind `Arc`.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod array_buffer;
pub mod async_context;
pub mod codec;
pub mod context;
pub mod convert;
pub mod date;
pub mod error;
pub mod externals;
pub mod format;
pub mod heap;
pub mod interpreter;
pub mod intrinsics;
pub mod memory;
pub mod module_registry;
pub mod object;
pub mod promise;
pub mod property;
pub mod query;
pub mod realm;
pub mod regexp;
pub mod state;
pub mod string;
pub mod symbol;
pub mod typed_array;
pub mod value;

pub use async_context::{AsyncContext, RunOutcome};
pub use context::{Frame, NativeCtx, VmContext};
pub use error::{VmError, VmResult};
pub use interpreter::Interpreter;
pub use object::{JsObject, ObjectKind};
pub use property::{PropertyDescriptor, PropertyKey};
pub use state::{CoreOptions, VmState};
pub use value::Value;
