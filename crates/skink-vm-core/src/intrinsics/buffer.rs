//! Binary intrinsics: `ArrayBuffer`, the typed-array constructors,
//! `DataView`, and the `Buffer` codec surface (utf8/hex/base64/base64url)

use std::sync::Arc;

use crate::codec::{self, Encoding};
use crate::context::NativeCtx;
use crate::convert;
use crate::error::{VmError, VmResult};
use crate::intrinsics::helpers::{arg, handler_property, install_ctor, method, native_ctor, native_fn};
use crate::array_buffer::JsArrayBuffer;
use crate::object::{JsObject, ObjectKind};
use crate::property::{PropertyDescriptor, PropertyKey, PropertyTable};
use crate::state::VmState;
use crate::typed_array::{JsDataView, JsTypedArray, TypedArrayKind};
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    install_array_buffer(state);
    install_typed_arrays(state);
    install_data_view(state);
    install_buffer(state);
}

fn receiver_buffer(this: &Value) -> VmResult<Arc<JsArrayBuffer>> {
    match this.as_object().map(|o| o.kind()) {
        Some(ObjectKind::ArrayBuffer(buf)) => Ok(buf.clone()),
        _ => Err(VmError::type_error("receiver is not an ArrayBuffer")),
    }
}

fn install_array_buffer(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    handler_property(
        &mut table,
        "byteLength",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::number(receiver_buffer(base)?.byte_len() as f64))
        })),
        None,
        0,
    );

    method(&mut table, state, "slice", 2, |ncx, this, args| {
        let buf = receiver_buffer(this)?;
        let len = buf.byte_len() as f64;
        let start = convert::to_number(ncx, &arg(args, 0))?.max(0.0).min(len) as usize;
        let end = match arg(args, 1) {
            Value::Undefined => buf.byte_len(),
            other => convert::to_number(ncx, &other)?.max(0.0).min(len) as usize,
        };
        let sliced = Arc::new(buf.slice(start, end));
        let obj = ncx.state().heap.alloc_object(
            ObjectKind::ArrayBuffer(sliced),
            Some(ncx.realm().array_buffer_proto.clone()),
        )?;
        Ok(Value::object(obj))
    });

    state
        .realm
        .array_buffer_proto
        .attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "ArrayBuffer", 1, |ncx, _this, args| {
        let len = convert::to_index(convert::to_number(ncx, &arg(args, 0))?)?;
        let buf = Arc::new(JsArrayBuffer::new(len)?);
        let obj = ncx.state().heap.alloc_object(
            ObjectKind::ArrayBuffer(buf),
            Some(ncx.realm().array_buffer_proto.clone()),
        )?;
        Ok(Value::object(obj))
    });
    install_ctor(state, "ArrayBuffer", ctor, &state.realm.array_buffer_proto);
}

fn install_typed_arrays(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    handler_property(
        &mut table,
        "length",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::number(typed_array_of(base)?.len() as f64))
        })),
        None,
        0,
    );
    handler_property(
        &mut table,
        "byteLength",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            let ta = typed_array_of(base)?;
            Ok(Value::number(
                (ta.len() * ta.kind().element_size()) as f64,
            ))
        })),
        None,
        1,
    );
    handler_property(
        &mut table,
        "byteOffset",
        Some(Arc::new(|_ncx, base, _magic, _setval| {
            Ok(Value::number(typed_array_of(base)?.byte_offset() as f64))
        })),
        None,
        2,
    );
    handler_property(
        &mut table,
        "buffer",
        Some(Arc::new(|ncx, base, _magic, _setval| {
            let ta = typed_array_of(base)?;
            let obj = ncx.state().heap.alloc_object(
                ObjectKind::ArrayBuffer(ta.buffer().clone()),
                Some(ncx.realm().array_buffer_proto.clone()),
            )?;
            Ok(Value::object(obj))
        })),
        None,
        3,
    );

    method(&mut table, state, "fill", 1, |ncx, this, args| {
        let ta = typed_array_of(this)?;
        let value = convert::to_number(ncx, &arg(args, 0))?;
        for i in 0..ta.len() {
            ta.set(i, value)?;
        }
        Ok(this.clone())
    });

    state
        .realm
        .typed_array_proto
        .attach_shared_table(Arc::new(table));

    for kind in [
        TypedArrayKind::Int8,
        TypedArrayKind::Uint8,
        TypedArrayKind::Int16,
        TypedArrayKind::Uint16,
        TypedArrayKind::Int32,
        TypedArrayKind::Uint32,
        TypedArrayKind::Float32,
        TypedArrayKind::Float64,
    ] {
        let ctor = native_ctor(state, kind.name(), 1, move |ncx, _this, args| {
            let view = construct_typed_array(ncx, kind, args)?;
            let obj = ncx.state().heap.alloc_object(
                ObjectKind::TypedArray(view),
                Some(ncx.realm().typed_array_proto.clone()),
            )?;
            Ok(Value::object(obj))
        });
        install_ctor(state, kind.name(), ctor, &state.realm.typed_array_proto);
    }
}

fn typed_array_of(value: &Value) -> VmResult<&JsTypedArray> {
    match value.as_object().map(|o| o.kind()) {
        Some(ObjectKind::TypedArray(ta)) => Ok(ta),
        _ => Err(VmError::type_error("receiver is not a typed array")),
    }
}

fn construct_typed_array(
    ncx: &mut NativeCtx<'_>,
    kind: TypedArrayKind,
    args: &[Value],
) -> VmResult<JsTypedArray> {
    match arg(args, 0) {
        // new Uint8Array(buffer [, byteOffset [, length]])
        Value::Object(obj) if matches!(obj.kind(), ObjectKind::ArrayBuffer(_)) => {
            let ObjectKind::ArrayBuffer(buf) = obj.kind() else {
                unreachable!()
            };
            let offset = convert::to_index(convert::to_number(ncx, &arg(args, 1))?)?;
            let length = match arg(args, 2) {
                Value::Undefined => {
                    (buf.byte_len().saturating_sub(offset)) / kind.element_size()
                }
                other => convert::to_index(convert::to_number(ncx, &other)?)?,
            };
            JsTypedArray::new(buf.clone(), kind, offset, length)
        }
        // new Uint8Array(array-like)
        Value::Object(obj) if obj.is_fast_array() => {
            let len = obj.array_length() as usize;
            let buf = Arc::new(JsArrayBuffer::new(len * kind.element_size())?);
            let view = JsTypedArray::new(buf, kind, 0, len)?;
            for i in 0..len {
                let value = obj.element(i as u32).unwrap_or_default();
                view.set(i, convert::to_number(ncx, &value)?)?;
            }
            Ok(view)
        }
        // new Uint8Array(length)
        other => {
            let len = convert::to_index(convert::to_number(ncx, &other)?)?;
            let buf = Arc::new(JsArrayBuffer::new(len * kind.element_size())?);
            JsTypedArray::new(buf, kind, 0, len)
        }
    }
}

fn install_data_view(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    macro_rules! uint_accessor {
        ($get:literal, $set:literal, $size:literal, $signed:literal) => {
            method(&mut table, state, $get, 2, move |ncx, this, args| {
                let offset = convert::to_index(convert::to_number(ncx, &arg(args, 0))?)?;
                let little_endian = arg(args, 1).to_boolean();
                let dv = match this.as_object().map(|o| o.kind()) {
                    Some(ObjectKind::DataView(dv)) => dv,
                    _ => return Err(VmError::type_error("receiver is not a DataView")),
                };
                let raw = dv.get_uint(offset, $size, little_endian)?;
                let n = if $signed {
                    let shift = 64 - ($size * 8);
                    (((raw << shift) as i64) >> shift) as f64
                } else {
                    raw as f64
                };
                Ok(Value::number(n))
            });
            method(&mut table, state, $set, 3, move |ncx, this, args| {
                let offset = convert::to_index(convert::to_number(ncx, &arg(args, 0))?)?;
                let value = convert::to_number(ncx, &arg(args, 1))?;
                let little_endian = arg(args, 2).to_boolean();
                let dv = match this.as_object().map(|o| o.kind()) {
                    Some(ObjectKind::DataView(dv)) => dv,
                    _ => return Err(VmError::type_error("receiver is not a DataView")),
                };
                let raw = if $signed {
                    convert::to_int32(value) as i64 as u64
                } else {
                    convert::to_uint32(value) as u64
                };
                dv.set_uint(offset, $size, raw, little_endian)?;
                Ok(Value::undefined())
            });
        };
    }

    uint_accessor!("getUint8", "setUint8", 1, false);
    uint_accessor!("getInt8", "setInt8", 1, true);
    uint_accessor!("getUint16", "setUint16", 2, false);
    uint_accessor!("getInt16", "setInt16", 2, true);
    uint_accessor!("getUint32", "setUint32", 4, false);
    uint_accessor!("getInt32", "setInt32", 4, true);

    method(&mut table, state, "getFloat64", 2, move |ncx, this, args| {
        let offset = convert::to_index(convert::to_number(ncx, &arg(args, 0))?)?;
        let little_endian = arg(args, 1).to_boolean();
        let dv = match this.as_object().map(|o| o.kind()) {
            Some(ObjectKind::DataView(dv)) => dv,
            _ => return Err(VmError::type_error("receiver is not a DataView")),
        };
        Ok(Value::number(dv.get_float64(offset, little_endian)?))
    });
    method(&mut table, state, "setFloat64", 3, move |ncx, this, args| {
        let offset = convert::to_index(convert::to_number(ncx, &arg(args, 0))?)?;
        let value = convert::to_number(ncx, &arg(args, 1))?;
        let little_endian = arg(args, 2).to_boolean();
        let dv = match this.as_object().map(|o| o.kind()) {
            Some(ObjectKind::DataView(dv)) => dv,
            _ => return Err(VmError::type_error("receiver is not a DataView")),
        };
        dv.set_float64(offset, value, little_endian)?;
        Ok(Value::undefined())
    });

    state
        .realm
        .data_view_proto
        .attach_shared_table(Arc::new(table));

    let ctor = native_ctor(state, "DataView", 1, |ncx, _this, args| {
        let target = arg(args, 0);
        let buf = match target.as_object().map(|o| o.kind()) {
            Some(ObjectKind::ArrayBuffer(buf)) => buf.clone(),
            _ => return Err(VmError::type_error("DataView expects an ArrayBuffer")),
        };
        let offset = convert::to_index(convert::to_number(ncx, &arg(args, 1))?)?;
        let length = match arg(args, 2) {
            Value::Undefined => buf.byte_len().saturating_sub(offset),
            other => convert::to_index(convert::to_number(ncx, &other)?)?,
        };
        let view = JsDataView::new(buf, offset, length)?;
        let obj = ncx.state().heap.alloc_object(
            ObjectKind::DataView(view),
            Some(ncx.realm().data_view_proto.clone()),
        )?;
        Ok(Value::object(obj))
    });
    install_ctor(state, "DataView", ctor, &state.realm.data_view_proto);
}

fn install_buffer(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    method(&mut table, state, "toString", 1, |ncx, this, args| {
        let ta = typed_array_of(this)?;
        let encoding = match arg(args, 0) {
            Value::Undefined => Encoding::Utf8,
            other => Encoding::from_name(convert::to_string(ncx, &other)?.as_str())?,
        };
        let mut bytes = Vec::with_capacity(ta.len());
        for i in 0..ta.len() {
            bytes.push(ta.get(i).unwrap_or(0.0) as u8);
        }
        Ok(Value::string(codec::encode(&bytes, encoding).as_str()))
    });

    state.realm.buffer_proto.attach_shared_table(Arc::new(table));

    let buffer_ns = JsObject::plain(Some(state.realm.object_proto.clone()));

    let _ = buffer_ns.define_own(
        PropertyKey::string("from"),
        PropertyDescriptor::builtin(native_fn(state, "from", 2, |ncx, _this, args| {
            let bytes = match arg(args, 0) {
                Value::String(s) => {
                    let encoding = match arg(args, 1) {
                        Value::Undefined => Encoding::Utf8,
                        other => {
                            Encoding::from_name(convert::to_string(ncx, &other)?.as_str())?
                        }
                    };
                    codec::decode(s.as_str(), encoding)?
                }
                Value::Object(obj) if obj.is_fast_array() => {
                    let mut out = Vec::new();
                    for i in 0..obj.array_length() {
                        let value = obj.element(i).unwrap_or_default();
                        out.push(convert::to_uint32(convert::to_number(ncx, &value)?) as u8);
                    }
                    out
                }
                _ => return Err(VmError::type_error("Buffer.from expects a string or array")),
            };
            make_buffer(ncx, bytes)
        })),
    );

    let _ = buffer_ns.define_own(
        PropertyKey::string("alloc"),
        PropertyDescriptor::builtin(native_fn(state, "alloc", 1, |ncx, _this, args| {
            let len = convert::to_index(convert::to_number(ncx, &arg(args, 0))?)?;
            make_buffer(ncx, vec![0; len])
        })),
    );

    let _ = buffer_ns.define_own(
        PropertyKey::string("byteLength"),
        PropertyDescriptor::builtin(native_fn(state, "byteLength", 2, |ncx, _this, args| {
            let text = convert::to_string(ncx, &arg(args, 0))?;
            let encoding = match arg(args, 1) {
                Value::Undefined => Encoding::Utf8,
                other => Encoding::from_name(convert::to_string(ncx, &other)?.as_str())?,
            };
            Ok(Value::number(codec::decode(text.as_str(), encoding)?.len() as f64))
        })),
    );

    let _ = buffer_ns.define_own(
        PropertyKey::string("isBuffer"),
        PropertyDescriptor::builtin(native_fn(state, "isBuffer", 1, |ncx, _this, args| {
            let is_buffer = arg(args, 0).as_object().is_some_and(|o| {
                matches!(o.kind(), ObjectKind::TypedArray(_))
                    && o.prototype()
                        .is_some_and(|p| Arc::ptr_eq(&p, &ncx.realm().buffer_proto))
            });
            Ok(Value::boolean(is_buffer))
        })),
    );

    crate::intrinsics::helpers::global(state, "Buffer", Value::object(buffer_ns));
}

/// Wrap raw bytes as a Buffer (a Uint8 view with the Buffer prototype)
fn make_buffer(ncx: &NativeCtx<'_>, bytes: Vec<u8>) -> VmResult<Value> {
    let len = bytes.len();
    let buf = Arc::new(JsArrayBuffer::from_bytes(bytes));
    let view = JsTypedArray::new(buf, TypedArrayKind::Uint8, 0, len)?;
    let obj = ncx.state().heap.alloc_object(
        ObjectKind::TypedArray(view),
        Some(ncx.realm().buffer_proto.clone()),
    )?;
    Ok(Value::object(obj))
}
