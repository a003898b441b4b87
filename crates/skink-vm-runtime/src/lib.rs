//! # Skink VM runtime
//!
//! The embedding surface of the skink scripting engine: [`Vm`] wraps the
//! core interpreter with an event loop (timers + job drain), a module
//! loader hook, host-type registration and the options enumerated at
//! creation. One `Vm` is single-threaded cooperative; drive it from one
//! thread and it never takes locks across host calls.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod event_loop;
pub mod loader;
pub mod options;
pub mod vm;

pub use event_loop::EventLoop;
pub use loader::FsModuleLoader;
pub use options::{Addon, HostOps, VmOptions};
pub use vm::{RuntimeError, Vm};

// Re-exports so embedders need only this crate
pub use skink_vm_bytecode::Module;
pub use skink_vm_core::error::{VmError, VmResult};
pub use skink_vm_core::externals::{ExternalDescriptor, ExternalProtoId};
pub use skink_vm_core::state::RejectionEvent;
pub use skink_vm_core::value::Value;
