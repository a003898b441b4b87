//! Builders shared by the intrinsics installers

use std::sync::Arc;

use crate::context::NativeCtx;
use crate::error::VmResult;
use crate::object::{JsObject, ObjectKind};
use crate::property::{
    HandlerFn, PropertyAttributes, PropertyDescriptor, PropertyKey, PropertyTable,
};
use crate::state::VmState;
use crate::value::{FunctionData, FunctionKind, NativeFn, NativeOutcome, Value};

/// Build a native function value
pub fn native_fn<F>(state: &Arc<VmState>, name: &str, length: u32, f: F) -> Value
where
    F: Fn(&mut NativeCtx<'_>, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
{
    native_fn_raw(state, name, length, false, move |ncx, this, args| {
        f(ncx, this, args).map(NativeOutcome::Value)
    })
}

/// Build a native constructor value (callable with `new`)
pub fn native_ctor<F>(state: &Arc<VmState>, name: &str, length: u32, f: F) -> Value
where
    F: Fn(&mut NativeCtx<'_>, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
{
    native_fn_raw(state, name, length, true, move |ncx, this, args| {
        f(ncx, this, args).map(NativeOutcome::Value)
    })
}

/// Build a native with full outcome control (value or suspension)
pub fn native_fn_raw<F>(
    state: &Arc<VmState>,
    name: &str,
    length: u32,
    is_ctor: bool,
    f: F,
) -> Value
where
    F: Fn(&mut NativeCtx<'_>, &Value, &[Value]) -> VmResult<NativeOutcome>
        + Send
        + Sync
        + 'static,
{
    let func: NativeFn = Arc::new(f);
    let obj = JsObject::new(
        ObjectKind::Function(FunctionData {
            kind: FunctionKind::Native {
                func,
                arg_spec: Vec::new(),
                magic: 0,
            },
            is_ctor,
            is_async: false,
        }),
        Some(state.realm.function_proto.clone()),
    );
    let _ = obj.define_own(
        PropertyKey::string("name"),
        PropertyDescriptor::builtin(Value::string(name)),
    );
    let _ = obj.define_own(
        PropertyKey::string("length"),
        PropertyDescriptor::builtin(Value::number(length as f64)),
    );
    Value::object(obj)
}

/// Insert a method descriptor into a prototype-pool table
pub fn method<F>(table: &mut PropertyTable, state: &Arc<VmState>, name: &str, length: u32, f: F)
where
    F: Fn(&mut NativeCtx<'_>, &Value, &[Value]) -> VmResult<Value> + Send + Sync + 'static,
{
    table.insert(
        PropertyKey::string(name),
        PropertyDescriptor::builtin(native_fn(state, name, length, f)),
    );
}

/// Insert a handler-backed dynamic property into a prototype-pool table
pub fn handler_property(
    table: &mut PropertyTable,
    name: &str,
    get: Option<HandlerFn>,
    set: Option<HandlerFn>,
    magic: u32,
) {
    table.insert(
        PropertyKey::string(name),
        PropertyDescriptor::Handler {
            get,
            set,
            magic,
            attributes: PropertyAttributes {
                writable: true,
                enumerable: false,
                configurable: false,
            },
        },
    );
}

/// Insert a plain data entry into a prototype-pool table
pub fn data(table: &mut PropertyTable, name: &str, value: Value) {
    table.insert(PropertyKey::string(name), PropertyDescriptor::builtin(value));
}

/// Define a non-enumerable global binding
pub fn global(state: &Arc<VmState>, name: &str, value: Value) {
    let _ = state.realm.global.define_own(
        PropertyKey::string(name),
        PropertyDescriptor::builtin(value),
    );
}

/// Wire a constructor and its prototype together and bind the
/// constructor as a global
pub fn install_ctor(state: &Arc<VmState>, name: &str, ctor: Value, proto: &Arc<JsObject>) {
    if let Some(ctor_obj) = ctor.as_object() {
        let _ = ctor_obj.define_own(
            PropertyKey::string("prototype"),
            PropertyDescriptor::data_with_attrs(
                Value::object(proto.clone()),
                PropertyAttributes::frozen(),
            ),
        );
    }
    let _ = proto.define_own(
        PropertyKey::string("constructor"),
        PropertyDescriptor::builtin(ctor.clone()),
    );
    global(state, name, ctor);
}

/// The first argument, or undefined
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}
