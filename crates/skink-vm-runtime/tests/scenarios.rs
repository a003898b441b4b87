//! End-to-end engine behaviour: compile, run, observe.

use skink_vm_runtime::{Vm, VmOptions, Value};

fn vm() -> Vm {
    Vm::new(VmOptions::default()).expect("vm creation")
}

/// Compile and run a script, returning its completion value
fn run(source: &str) -> Value {
    let mut vm = vm();
    let module = vm.compile(source, "test.js").expect("compile");
    vm.start(module).expect("run")
}

/// Compile and run, returning the host-visible error message
fn run_err(source: &str) -> String {
    let mut vm = vm();
    let module = vm.compile(source, "test.js").expect("compile");
    vm.start(module).expect_err("expected failure").to_string()
}

fn number(value: &Value) -> f64 {
    value.as_number().unwrap_or_else(|| panic!("expected number, got {value:?}"))
}

fn text(value: &Value) -> String {
    value
        .as_string()
        .unwrap_or_else(|| panic!("expected string, got {value:?}"))
        .as_str()
        .to_string()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn closure_capture_shares_the_slot() {
    // The captured x mutates across calls through the shared cell
    let result = run(
        "var f = (function () { var x = 1; return function () { return ++x; }; })();\n\
         f(); f();",
    );
    assert_eq!(number(&result), 3.0);
}

#[test]
fn finally_return_wins() {
    let result = run("function g() { try { return 1; } finally { return 2; } } g();");
    assert_eq!(number(&result), 2.0);
}

#[test]
fn prototype_shadow_then_delete_reveals_inherited() {
    let result = run("var o = Object.create({a: 1}); o.a = 2; delete o.a; o.a;");
    assert_eq!(number(&result), 1.0);
}

#[test]
fn await_rejection_is_caught() {
    let mut vm = vm();
    let module = vm
        .compile(
            "var result;\n\
             async function f() {\n\
               try { await Promise.reject('x'); return 'ok'; }\n\
               catch (e) { return e; }\n\
             }\n\
             f().then(function (v) { result = v; });",
            "test.js",
        )
        .unwrap();
    vm.start(module).unwrap();
    vm.run_event_loop().unwrap();
    assert_eq!(text(&vm.global("result").unwrap()), "x");
}

#[test]
fn arithmetic_coercions() {
    assert_eq!(text(&run("[] + [];")), "");
    assert_eq!(text(&run("[] + {};")), "[object Object]");
    assert_eq!(text(&run("1 + \"2\";")), "12");
    assert_eq!(number(&run("\"3\" - 1;")), 2.0);
}

#[test]
fn exception_crosses_native_frames() {
    // The callback's throw surfaces through Array.prototype.map; no
    // partial result is observable
    let message = run_err(
        "var out = null;\n\
         out = [1, 2, 3].map(function () { throw new RangeError('r'); });",
    );
    assert!(message.contains("r"), "unexpected error: {message}");

    let result = run(
        "var out = 'untouched';\n\
         try { out = [1, 2, 3].map(function () { throw new RangeError('r'); }); }\n\
         catch (e) { }\n\
         out;",
    );
    assert_eq!(text(&result), "untouched");
}

// ---------------------------------------------------------------------------
// Invariants and boundary behaviour
// ---------------------------------------------------------------------------

#[test]
fn delete_removes_own_property() {
    let result = run("var o = {a: 1}; delete o.a; 'a' in o;");
    assert_eq!(result, Value::boolean(false));
}

#[test]
fn fast_array_length_tracks_writes() {
    assert_eq!(number(&run("var a = [1, 2, 3]; a[1] = 9; a.length;")), 3.0);
    assert_eq!(number(&run("var a = [1, 2, 3]; a[5] = 9; a.length;")), 6.0);
}

#[test]
fn finally_runs_exactly_once_per_exit() {
    let result = run(
        "var count = 0;\n\
         function f(mode) {\n\
           try {\n\
             if (mode === 'throw') { throw 'boom'; }\n\
             if (mode === 'return') { return 'r'; }\n\
           } catch (e) {\n\
           } finally {\n\
             count = count + 1;\n\
           }\n\
           return 'fell through';\n\
         }\n\
         f('throw'); f('return'); f('plain');\n\
         count;",
    );
    assert_eq!(number(&result), 3.0);
}

#[test]
fn break_through_finally_routes() {
    let result = run(
        "var log = [];\n\
         for (var i = 0; i < 3; i++) {\n\
           try {\n\
             if (i === 1) { break; }\n\
             log.push(i);\n\
           } finally {\n\
             log.push('f');\n\
           }\n\
         }\n\
         log.join(',');",
    );
    assert_eq!(text(&result), "0,f,f");
}

#[test]
fn pop_on_empty_array() {
    let result = run("var a = []; var v = a.pop(); [v === undefined, a.length].join(',');");
    assert_eq!(text(&result), "true,0");
}

#[test]
fn object_of_null_is_an_object() {
    let result = run("var o = Object(null); typeof o;");
    assert_eq!(text(&result), "object");
}

#[test]
fn string_index_out_of_range_is_undefined() {
    let result = run("var s = 'abc'; s[5] === undefined;");
    assert_eq!(result, Value::boolean(true));
}

#[test]
fn int32_coercions() {
    assert_eq!(number(&run("(NaN | 0);")), 0.0);
    assert_eq!(number(&run("(Infinity | 0);")), 0.0);
    assert_eq!(number(&run("(4294967296 | 0);")), 0.0);
    assert_eq!(number(&run("(-1 >>> 0);")), 4294967295.0);
}

#[test]
fn negative_zero_prints_as_zero_but_object_is_distinguishes() {
    assert_eq!(text(&run("(-0).toString();")), "0");
    assert_eq!(run("Object.is(-0, +0);"), Value::boolean(false));
    assert_eq!(run("Object.is(NaN, NaN);"), Value::boolean(true));
}

#[test]
fn json_roundtrip() {
    let result = run(
        "var v = {a: [1, 2, {b: 'x'}], c: null, d: true};\n\
         var w = JSON.parse(JSON.stringify(v));\n\
         [w.a[2].b, w.a.length, w.c === null, w.d].join(',');",
    );
    assert_eq!(text(&result), "x,3,true,true");
}

#[test]
fn buffer_codec_roundtrip() {
    for encoding in ["utf8", "hex", "base64", "base64url"] {
        let source = format!(
            "Buffer.from(Buffer.from('skink buffer', 'utf8').toString('{encoding}'), '{encoding}').toString('utf8');"
        );
        assert_eq!(text(&run(&source)), "skink buffer", "encoding {encoding}");
    }
}

#[test]
fn array_from_preserves_length() {
    assert_eq!(number(&run("Array.from('abc').length;")), 3.0);
    assert_eq!(
        number(&run("Array.from({length: 2, 0: 'a', 1: 'b'}).length;")),
        2.0
    );
}

#[test]
fn loose_and_strict_equality() {
    assert_eq!(run("null == undefined;"), Value::boolean(true));
    assert_eq!(run("null === undefined;"), Value::boolean(false));
    assert_eq!(run("1 == '1';"), Value::boolean(true));
    assert_eq!(run("NaN === NaN;"), Value::boolean(false));
    assert_eq!(run("'' == false;"), Value::boolean(true));
}

#[test]
fn for_in_sees_enumerable_chain_keys_once() {
    let result = run(
        "var proto = {a: 1, b: 2};\n\
         var o = Object.create(proto);\n\
         o.a = 10; o.c = 3;\n\
         var keys = [];\n\
         for (var k in o) { keys.push(k); }\n\
         keys.sort().join(',');",
    );
    assert_eq!(text(&result), "a,b,c");
}

#[test]
fn temporal_dead_zone_raises_reference_error() {
    let message = run_err("function f() { x; let x = 1; } f();");
    assert!(message.contains("before initialization"), "{message}");
}

#[test]
fn typeof_undeclared_does_not_throw() {
    assert_eq!(text(&run("typeof neverDeclared;")), "undefined");
}

#[test]
fn prototype_cycle_is_refused() {
    let message = run_err("var a = {}; var b = Object.create(a); a.__proto__ = b;");
    assert!(message.contains("cyclic"), "{message}");
}

// ---------------------------------------------------------------------------
// Async ordering
// ---------------------------------------------------------------------------

#[test]
fn microtasks_drain_before_timers() {
    let mut vm = vm();
    let module = vm
        .compile(
            "var order = [];\n\
             setTimeout(function () { order.push('timer'); }, 0);\n\
             Promise.resolve(1).then(function () { order.push('micro'); });\n\
             order.push('sync');",
            "test.js",
        )
        .unwrap();
    vm.start(module).unwrap();
    vm.run_event_loop().unwrap();

    // A later compilation resolves `order` through the same global cell
    let probe = vm.compile("order.join(',');", "probe.js").unwrap();
    let joined = vm.start(probe).unwrap();
    assert_eq!(text(&joined), "sync,micro,timer");
}

#[test]
fn await_suspends_and_resumes_through_timers() {
    let mut vm = vm();
    let module = vm
        .compile(
            "var out;\n\
             function delay(value, ms) {\n\
               return new Promise(function (resolve) {\n\
                 setTimeout(function () { resolve(value); }, ms);\n\
               });\n\
             }\n\
             async function main() {\n\
               var a = await delay('a', 2);\n\
               var b = await delay('b', 1);\n\
               out = a + b;\n\
             }\n\
             main();",
            "test.js",
        )
        .unwrap();
    vm.start(module).unwrap();
    vm.run_event_loop().unwrap();
    assert_eq!(text(&vm.global("out").unwrap()), "ab");
}

#[test]
fn async_function_returns_pending_promise_to_sync_caller() {
    let mut vm = vm();
    let module = vm
        .compile(
            "var sawPromiseFirst = false;\n\
             var settled = null;\n\
             async function f() {\n\
               return await new Promise(function (resolve) {\n\
                 setTimeout(function () { resolve(7); }, 0);\n\
               });\n\
             }\n\
             var p = f();\n\
             sawPromiseFirst = typeof p === 'object';\n\
             p.then(function (v) { settled = v; });",
            "test.js",
        )
        .unwrap();
    vm.start(module).unwrap();
    vm.run_event_loop().unwrap();
    assert_eq!(vm.global("sawPromiseFirst").unwrap(), Value::boolean(true));
    assert_eq!(number(&vm.global("settled").unwrap()), 7.0);
}

#[test]
fn unhandled_rejections_are_tracked() {
    let mut vm = vm();
    let module = vm
        .compile("Promise.reject('lost');", "test.js")
        .unwrap();
    vm.start(module).unwrap();
    vm.run_event_loop().unwrap();

    let rejections = vm.take_unhandled_rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(text(&rejections[0]), "lost");
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

#[test]
fn module_evaluates_once_and_caches() {
    use skink_vm_runtime::FsModuleLoader;
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let mut dep = std::fs::File::create(dir.path().join("dep.js")).unwrap();
    writeln!(
        dep,
        "sideEffects = sideEffects + 1;\nexport default 'exported';"
    )
    .unwrap();

    let mut vm = vm();
    vm.set_module_loader(FsModuleLoader::new(vec![dir.path().to_path_buf()]).into_loader());
    vm.bind("sideEffects", Value::number(0.0));

    let main = dir.path().join("main.mjs");
    std::fs::write(
        &main,
        "import first from \"dep\";\nimport second from \"dep\";\n\
         export default first + ':' + second;",
    )
    .unwrap();
    let source = std::fs::read_to_string(&main).unwrap();
    let module = vm.compile(&source, main.to_str().unwrap()).unwrap();
    let result = vm.start(module).unwrap();

    assert_eq!(text(&result), "exported:exported");
    assert_eq!(number(&vm.global("sideEffects").unwrap()), 1.0);
}

// ---------------------------------------------------------------------------
// Host types
// ---------------------------------------------------------------------------

#[test]
fn external_prototype_roundtrip() {
    use skink_vm_core::value::NativeOutcome;
    use skink_vm_runtime::ExternalDescriptor;
    use std::sync::Arc;

    struct Widget {
        label: String,
    }

    let mut vm = vm();
    let proto_id = vm.register_external_prototype(vec![
        ExternalDescriptor::Property {
            name: "label".to_string(),
            get: Some(Arc::new(|_ncx, base, _magic, _setval| {
                // The handler reads back through the external payload
                let obj = base.as_object().expect("external base");
                let skink_vm_core::object::ObjectKind::External { data, .. } = obj.kind() else {
                    return Ok(Value::undefined());
                };
                let widget = data.clone().downcast::<Widget>().expect("widget payload");
                Ok(Value::string(widget.label.as_str()))
            })),
            set: None,
            magic: 0,
        },
        ExternalDescriptor::Method {
            name: "describe".to_string(),
            func: Arc::new(|ncx, this, _args| {
                let label = ncx.get_property(
                    this,
                    &skink_vm_core::property::PropertyKey::string("label"),
                )?;
                Ok(NativeOutcome::Value(Value::string(
                    format!("widget:{}", skink_vm_core::format::describe(&label)).as_str(),
                )))
            }),
            arg_spec: Vec::new(),
            magic: 0,
            ctor: false,
        },
    ]);

    let widget = vm
        .external_create(proto_id, Arc::new(Widget { label: "knob".to_string() }))
        .unwrap();
    vm.bind("widget", widget.clone());

    let module = vm.compile("widget.describe();", "test.js").unwrap();
    assert_eq!(text(&vm.start(module).unwrap()), "widget:knob");

    let unwrapped = vm.external_unwrap(&widget, proto_id).unwrap();
    assert_eq!(unwrapped.downcast::<Widget>().unwrap().label, "knob");
}

// ---------------------------------------------------------------------------
// Failure surfaces
// ---------------------------------------------------------------------------

#[test]
fn uncaught_error_carries_shape() {
    let mut vm = vm();
    let module = vm
        .compile("function f() { throw new TypeError('bad'); } f();", "test.js")
        .unwrap();
    assert!(vm.start(module).is_err());

    // Observable error shape: name, message, stack
    let exception = vm.exception().expect("exception recorded");
    let obj = exception.as_object().expect("error object");
    let get = |key: &str| {
        obj.own_descriptor(&skink_vm_core::property::PropertyKey::string(key))
            .and_then(|(d, _)| d.value().cloned())
    };
    assert_eq!(get("message"), Some(Value::string("bad")));
    let stack = get("stack").expect("stack attached");
    assert!(stack.as_string().unwrap().as_str().contains("TypeError: bad"));
}

#[test]
fn interrupt_drains_execution() {
    let mut vm = vm();
    vm.interrupt_handle()
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let module = vm.compile("while (true) { }", "test.js").unwrap();
    assert!(vm.start(module).is_err());
}

#[test]
fn sandbox_refuses_imports() {
    let mut vm = Vm::new(VmOptions {
        sandbox: true,
        ..Default::default()
    })
    .unwrap();
    let err = vm
        .compile("import x from \"anything\"; x;", "main.mjs")
        .expect_err("sandboxed import must fail");
    assert!(err.to_string().contains("module"));
}

#[test]
fn eval_gated_by_unsafe_option() {
    let message = run_err("eval('1 + 1');");
    assert!(message.contains("eval"), "{message}");

    let mut vm = Vm::new(VmOptions {
        unsafe_eval: true,
        ..Default::default()
    })
    .unwrap();
    let module = vm.compile("eval('40 + 2');", "test.js").unwrap();
    assert_eq!(number(&vm.start(module).unwrap()), 42.0);
}
