//! Error constructors and prototypes
//!
//! One constructor per error class, each wired to its realm prototype.
//! The observable shape is `{name, message, stack}`.

use std::sync::Arc;

use skink_vm_bytecode::ErrorKind;

use crate::convert;
use crate::error::VmResult;
use crate::intrinsics::helpers::{arg, data, install_ctor, method, native_ctor};
use crate::object::ObjectKind;
use crate::property::{PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::value::Value;

const KINDS: [ErrorKind; 7] = [
    ErrorKind::Error,
    ErrorKind::Type,
    ErrorKind::Range,
    ErrorKind::Syntax,
    ErrorKind::Reference,
    ErrorKind::Internal,
    ErrorKind::Memory,
];

pub(super) fn install(state: &Arc<VmState>) {
    for kind in KINDS {
        let proto = state.realm.error_proto(kind);
        let mut table = PropertyTable::new();
        data(&mut table, "name", Value::string(kind.name()));
        data(&mut table, "message", Value::string(""));

        // Subclass prototypes inherit toString from the base Error proto
        if kind == ErrorKind::Error {
            method(&mut table, state, "toString", 0, |ncx, this, _args| {
                let name = ncx.get_property(this, &PropertyKey::string("name"))?;
                let message = ncx.get_property(this, &PropertyKey::string("message"))?;
                let name = convert::to_string(ncx, &name)?;
                let message = convert::to_string(ncx, &message)?;
                Ok(Value::string(
                    if message.is_empty() {
                        name.as_str().to_string()
                    } else {
                        format!("{}: {}", name.as_str(), message.as_str())
                    }
                    .as_str(),
                ))
            });
        }

        proto.attach_shared_table(Arc::new(table));

        let ctor = native_ctor(
            state,
            kind.name(),
            1,
            move |ncx, _this, args| -> VmResult<Value> {
                let proto = ncx.realm().error_proto(kind);
                let obj = ncx
                    .state()
                    .heap
                    .alloc_object(ObjectKind::Error, Some(proto))?;
                match arg(args, 0) {
                    Value::Undefined => {}
                    message => {
                        let message = convert::to_string(ncx, &message)?;
                        obj.define_own(
                            PropertyKey::string("message"),
                            PropertyDescriptor::builtin(Value::String(message)),
                        )?;
                    }
                }
                // Error construction captures the stack at the call site
                let mut stack = kind.name().to_string();
                if let Some((_, desc)) = obj
                    .own_descriptor(&PropertyKey::string("message"))
                    .map(|(d, s)| (s, d))
                    && let Some(Value::String(m)) = desc.value()
                    && !m.is_empty()
                {
                    stack.push_str(": ");
                    stack.push_str(m.as_str());
                }
                for line in ncx.ctx.stack_trace() {
                    stack.push('\n');
                    stack.push_str(&line);
                }
                obj.define_own(
                    PropertyKey::string("stack"),
                    PropertyDescriptor::builtin(Value::string(stack.as_str())),
                )?;
                Ok(Value::object(obj))
            },
        );
        install_ctor(state, kind.name(), ctor, &proto);
    }
}
