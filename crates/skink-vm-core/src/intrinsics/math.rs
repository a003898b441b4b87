//! `Math` intrinsic

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::convert;
use crate::error::VmResult;
use crate::intrinsics::helpers::{arg, data, global, method};
use crate::object::{JsObject, ObjectKind};
use crate::property::PropertyTable;
use crate::state::VmState;
use crate::value::Value;

pub(super) fn install(state: &Arc<VmState>) {
    let mut table = PropertyTable::new();

    data(&mut table, "PI", Value::number(std::f64::consts::PI));
    data(&mut table, "E", Value::number(std::f64::consts::E));
    data(&mut table, "LN2", Value::number(std::f64::consts::LN_2));
    data(&mut table, "LN10", Value::number(std::f64::consts::LN_10));
    data(&mut table, "SQRT2", Value::number(std::f64::consts::SQRT_2));

    macro_rules! unary {
        ($name:literal, $f:expr) => {
            method(&mut table, state, $name, 1, move |ncx, _this, args| {
                let n = convert::to_number(ncx, &arg(args, 0))?;
                let f: fn(f64) -> f64 = $f;
                Ok(Value::number(f(n)))
            });
        };
    }

    unary!("abs", f64::abs);
    unary!("floor", f64::floor);
    unary!("ceil", f64::ceil);
    unary!("trunc", f64::trunc);
    unary!("sqrt", f64::sqrt);
    unary!("cbrt", f64::cbrt);
    unary!("exp", f64::exp);
    unary!("log", f64::ln);
    unary!("log2", f64::log2);
    unary!("log10", f64::log10);
    unary!("sin", f64::sin);
    unary!("cos", f64::cos);
    unary!("tan", f64::tan);
    unary!("asin", f64::asin);
    unary!("acos", f64::acos);
    unary!("atan", f64::atan);
    unary!("sign", f64::signum);

    // JS round() rounds half toward +∞, unlike Rust's round()
    method(&mut table, state, "round", 1, |ncx, _this, args| {
        let n = convert::to_number(ncx, &arg(args, 0))?;
        Ok(Value::number((n + 0.5).floor()))
    });

    method(&mut table, state, "pow", 2, |ncx, _this, args| {
        let base = convert::to_number(ncx, &arg(args, 0))?;
        let exp = convert::to_number(ncx, &arg(args, 1))?;
        Ok(Value::number(base.powf(exp)))
    });

    method(&mut table, state, "atan2", 2, |ncx, _this, args| {
        let y = convert::to_number(ncx, &arg(args, 0))?;
        let x = convert::to_number(ncx, &arg(args, 1))?;
        Ok(Value::number(y.atan2(x)))
    });

    method(&mut table, state, "min", 2, |ncx, _this, args| {
        fold(ncx, args, f64::INFINITY, f64::min)
    });
    method(&mut table, state, "max", 2, |ncx, _this, args| {
        fold(ncx, args, f64::NEG_INFINITY, f64::max)
    });

    method(&mut table, state, "hypot", 2, |ncx, _this, args| {
        let mut sum = 0.0;
        for value in args {
            let n = convert::to_number(ncx, value)?;
            sum += n * n;
        }
        Ok(Value::number(sum.sqrt()))
    });

    // xorshift64* state, seeded per VM from the wall clock
    let rng = Arc::new(AtomicU64::new(
        (Utc::now().timestamp_nanos_opt().unwrap_or(0x9E3779B9) as u64) | 1,
    ));
    method(&mut table, state, "random", 0, move |_ncx, _this, _args| {
        let mut x = rng.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        rng.store(x, Ordering::Relaxed);
        let fraction = (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11) as f64;
        Ok(Value::number(fraction / (1u64 << 53) as f64))
    });

    let math = JsObject::with_shared_table(
        ObjectKind::Plain,
        Some(state.realm.object_proto.clone()),
        Arc::new(table),
    );
    global(state, "Math", Value::object(math));
}

fn fold(
    ncx: &mut crate::context::NativeCtx<'_>,
    args: &[Value],
    init: f64,
    f: fn(f64, f64) -> f64,
) -> VmResult<Value> {
    let mut acc = init;
    for value in args {
        let n = convert::to_number(ncx, value)?;
        if n.is_nan() {
            return Ok(Value::number(f64::NAN));
        }
        acc = f(acc, n);
    }
    Ok(Value::number(acc))
}
