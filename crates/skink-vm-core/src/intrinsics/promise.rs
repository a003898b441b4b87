//! `Promise` intrinsic
//!
//! Reactions never run inline: `then` parks a callback that enqueues a
//! job, and the host drains jobs between macro-events in registration
//! order.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::NativeCtx;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, install_ctor, method, native_ctor, native_fn, native_fn_raw};
use crate::object::{JsObject, ObjectKind};
use crate::promise::{JsPromise, PromiseJob};
use crate::property::{PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::value::{NativeOutcome, Value};

pub(super) fn install(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "then", 2, |ncx, this, args| {
        let promise = receiver_promise(this)?;
        register_reaction(ncx, &promise, arg(args, 0), arg(args, 1))
    });

    method(&mut table, state, "catch", 1, |ncx, this, args| {
        let promise = receiver_promise(this)?;
        register_reaction(ncx, &promise, Value::undefined(), arg(args, 0))
    });

    method(&mut table, state, "finally", 1, |ncx, this, args| {
        let promise = receiver_promise(this)?;
        let callback = arg(args, 0);

        // Wrap so the settlement passes through after the callback runs
        let on_fulfilled = {
            let callback = callback.clone();
            native_fn(ncx.state(), "", 1, move |ncx, _this, args| {
                if callback.is_function() {
                    ncx.call_function(&callback, &Value::undefined(), &[])?;
                }
                Ok(arg(args, 0))
            })
        };
        let on_rejected = native_fn(ncx.state(), "", 1, move |ncx, _this, args| {
            if callback.is_function() {
                ncx.call_function(&callback, &Value::undefined(), &[])?;
            }
            Err(VmError::thrown(arg(args, 0)))
        });

        register_reaction(ncx, &promise, on_fulfilled, on_rejected)
    });

    state
        .realm
        .promise_proto
        .attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "Promise", 1, |ncx, _this, args| {
        let executor = arg(args, 0);
        if !executor.is_function() {
            return Err(VmError::type_error("Promise resolver is not a function"));
        }
        let promise = JsPromise::new();
        let resolve = settle_fn(ncx, promise.clone(), false)?;
        let reject = settle_fn(ncx, promise.clone(), true)?;
        if let Err(e) = ncx.call_function(&executor, &Value::undefined(), &[resolve, reject]) {
            let reason = ncx.interp.error_value(ncx.ctx, e);
            ncx.state().reject_promise_tracked(&promise, reason);
        }
        wrap(ncx, promise)
    });

    let ctor_obj = ctor.as_object().expect("constructor is an object").clone();

    let _ = ctor_obj.define_own(
        PropertyKey::string("resolve"),
        PropertyDescriptor::builtin(native_fn(state, "resolve", 1, |ncx, _this, args| {
            let value = arg(args, 0);
            // Pass promise arguments through unchanged
            if let Some(obj) = value.as_object()
                && matches!(obj.kind(), ObjectKind::Promise(_))
            {
                return Ok(value);
            }
            let interp = ncx.interp;
            let promise = interp.promise_of(ncx.ctx, &value)?;
            wrap(ncx, promise)
        })),
    );

    let _ = ctor_obj.define_own(
        PropertyKey::string("reject"),
        PropertyDescriptor::builtin(native_fn(state, "reject", 1, |ncx, _this, args| {
            // Route through the tracker so an unhandled rejection is
            // observable at the next macrotask boundary
            let promise = JsPromise::new();
            ncx.state().reject_promise_tracked(&promise, arg(args, 0));
            wrap(ncx, promise)
        })),
    );

    let _ = ctor_obj.define_own(
        PropertyKey::string("all"),
        PropertyDescriptor::builtin(native_fn(state, "all", 1, |ncx, _this, args| {
            let Some(items) = arg(args, 0).as_object().filter(|o| o.is_fast_array()).cloned()
            else {
                return Err(VmError::type_error("Promise.all expects an array"));
            };
            let len = items.array_length();
            let combined = JsPromise::new();
            let results = Arc::new(Mutex::new(vec![Value::undefined(); len as usize]));
            let remaining = Arc::new(Mutex::new(len));

            if len == 0 {
                let empty = JsObject::array(0, Some(ncx.realm().array_proto.clone()));
                combined.resolve(Value::object(empty));
                return wrap(ncx, combined);
            }

            let array_proto = ncx.realm().array_proto.clone();
            for i in 0..len {
                let element = items.element(i).unwrap_or_default();
                let interp = ncx.interp;
                let promise = interp.promise_of(ncx.ctx, &element)?;
                ncx.state().mark_rejection_handled(&promise);

                let combined = combined.clone();
                let results = results.clone();
                let remaining = remaining.clone();
                let array_proto = array_proto.clone();
                promise.on_settle(move |settlement| match settlement {
                    Ok(value) => {
                        results.lock()[i as usize] = value;
                        let mut left = remaining.lock();
                        *left -= 1;
                        if *left == 0 {
                            let arr = JsObject::array(0, Some(array_proto));
                            for value in results.lock().iter() {
                                let _ = arr.push_element(value.clone());
                            }
                            combined.resolve(Value::object(arr));
                        }
                    }
                    Err(reason) => combined.reject(reason),
                });
            }
            wrap(ncx, combined)
        })),
    );

    install_ctor(state, "Promise", ctor, &state.realm.promise_proto);
}

/// The receiver's underlying promise
fn receiver_promise(this: &Value) -> VmResult<Arc<JsPromise>> {
    match this.as_object().map(|o| o.kind()) {
        Some(ObjectKind::Promise(p)) => Ok(p.clone()),
        _ => Err(VmError::type_error("receiver is not a promise")),
    }
}

/// Wrap a promise in its object form
fn wrap(ncx: &NativeCtx<'_>, promise: Arc<JsPromise>) -> VmResult<Value> {
    let obj = ncx.state().heap.alloc_object(
        ObjectKind::Promise(promise),
        Some(ncx.realm().promise_proto.clone()),
    )?;
    Ok(Value::object(obj))
}

/// Register `then` reactions; returns the derived promise object
fn register_reaction(
    ncx: &mut NativeCtx<'_>,
    promise: &Arc<JsPromise>,
    on_fulfilled: Value,
    on_rejected: Value,
) -> VmResult<Value> {
    if on_rejected.is_function() {
        ncx.state().mark_rejection_handled(promise);
    }
    let derived = JsPromise::new();
    let state = ncx.state().clone();
    let derived_for_job = derived.clone();
    promise.on_settle(move |settlement| {
        let callback = match &settlement {
            Ok(_) => on_fulfilled.clone(),
            Err(_) => on_rejected.clone(),
        };
        state.jobs.enqueue(PromiseJob::Reaction {
            callback,
            settlement,
            derived: derived_for_job.clone(),
        });
    });
    wrap(ncx, derived)
}

/// A one-shot resolve/reject function for the executor
fn settle_fn(
    ncx: &NativeCtx<'_>,
    promise: Arc<JsPromise>,
    rejecting: bool,
) -> VmResult<Value> {
    let state = ncx.state().clone();
    Ok(native_fn_raw(
        ncx.state(),
        "",
        1,
        false,
        move |_ncx, _this, args| {
            let value = arg(args, 0);
            if rejecting {
                state.reject_promise_tracked(&promise, value);
            } else if let Some(inner) = value.as_object().and_then(|o| match o.kind() {
                ObjectKind::Promise(p) => Some(p.clone()),
                _ => None,
            }) {
                // Resolving with a promise adopts its eventual state
                let promise = promise.clone();
                let state = state.clone();
                inner.on_settle(move |settlement| match settlement {
                    Ok(v) => promise.resolve(v),
                    Err(reason) => state.reject_promise_tracked(&promise, reason),
                });
            } else {
                promise.resolve(value);
            }
            Ok(NativeOutcome::Value(Value::undefined()))
        },
    ))
}
