//! Built-in globals and prototype pools
//!
//! Each installer builds a `PropertyTable`, attaches it to its realm
//! prototype as the shared (copy-on-write) pool, and binds the
//! constructor on the global object. Installation order matters only for
//! `object`, which wires the chain roots.

mod array;
mod buffer;
mod error;
mod global;
pub mod helpers;
mod json;
mod math;
mod number;
mod object;
mod promise;
mod string;

use std::sync::Arc;

use crate::state::VmState;

/// Install every intrinsic into the realm
pub fn install(state: &Arc<VmState>) {
    object::install(state);
    error::install(state);
    array::install(state);
    string::install(state);
    number::install(state);
    json::install(state);
    math::install(state);
    promise::install(state);
    buffer::install(state);
    global::install(state);
}
