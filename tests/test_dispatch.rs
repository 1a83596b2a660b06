use bindrt::sample::Sample;
use bindrt::{BindingError, OverrideErrorPolicy, RuntimeConfig, TypeSpec, Value, ValueCell, Wrapper};
use parking_lot::Mutex;
use std::sync::Arc;

fn sample() -> Sample {
    Sample::new().unwrap()
}

#[test]
fn test_native_default_without_override() {
    let s = sample();
    let rt = &s.runtime;
    let vm = rt.construct(s.types.virtual_methods, Vec::new()).unwrap();

    let args = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
    assert_eq!(rt.call_method(&vm, "callSum0", args).unwrap(), Value::Int(6));
    assert_eq!(
        rt.call_method(&vm, "callName", Vec::new()).unwrap(),
        Value::from("VirtualMethods")
    );
}

#[test]
fn test_override_reached_from_native_caller() {
    let s = sample();
    let rt = &s.runtime;
    let doubled = rt
        .register_type(
            TypeSpec::subtype("Doubled", s.types.virtual_methods).override_method("sum0", |frame, args| {
                let base = frame.call_super(args)?.as_int()?;
                Ok(Value::Int(base * 2))
            }),
        )
        .unwrap();
    let vm = rt.construct(doubled, Vec::new()).unwrap();

    let args = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
    assert_eq!(rt.call_method(&vm, "callSum0", args.clone()).unwrap(), Value::Int(12));
    // Explicit base call skips the override
    assert_eq!(rt.call_base(&vm, "sum0", args).unwrap(), Value::Int(6));
}

#[test]
fn test_daughter_name_through_override_chain() {
    let s = sample();
    let rt = &s.runtime;
    let loud = rt
        .register_type(
            TypeSpec::subtype("LoudDaughter", s.types.virtual_daughter).override_method("name", |frame, args| {
                let base = frame.call_super(args)?;
                Ok(Value::Str(base.as_str()?.to_uppercase()))
            }),
        )
        .unwrap();
    let d = rt.construct(loud, vec![Value::from("daughter")]).unwrap();

    assert_eq!(rt.call_method(&d, "callName", Vec::new()).unwrap(), Value::from("DAUGHTER"));
    assert_eq!(
        rt.call_method_as(&d, s.types.virtual_daughter, "name", Vec::new()).unwrap(),
        Value::from("daughter")
    );
}

#[test]
fn test_recursion_on_modified_virtual() {
    let s = sample();
    let rt = &s.runtime;
    let plain = rt.construct(s.types.virtual_methods, Vec::new()).unwrap();
    assert_eq!(
        rt.call_method(&plain, "callRecursionOnModifiedVirtual", vec![Value::Int(3)]).unwrap(),
        Value::Int(0)
    );

    let modified = rt
        .register_type(
            TypeSpec::subtype("Modified", s.types.virtual_methods).override_method(
                "recursionOnModifiedVirtual",
                |frame, args| {
                    let base = frame.call_super(args)?.as_int()?;
                    Ok(Value::Int(base + 10))
                },
            ),
        )
        .unwrap();
    let vm = rt.construct(modified, Vec::new()).unwrap();
    for n in [0, 1, 3, 8] {
        let result = rt
            .call_method(&vm, "callRecursionOnModifiedVirtual", vec![Value::Int(n)])
            .unwrap();
        assert_eq!(result, Value::Int(10));
    }

    let handle = rt.address_of(&vm).unwrap();
    let direct = rt
        .invoke_virtual(handle, "recursionOnModifiedVirtual", vec![Value::Int(2)])
        .unwrap();
    assert_eq!(direct, Value::Int(10));
}

#[test]
fn test_reference_argument_mutation_is_visible() {
    let s = sample();
    let rt = &s.runtime;
    let tens = rt
        .register_type(
            TypeSpec::subtype("Tens", s.types.virtual_methods).override_method("incRef", |_, args| {
                let cell = args[0].as_ref_cell()?;
                cell.update(|v| Value::Int(v.as_int().unwrap_or(0) + 10));
                Ok(Value::None)
            }),
        )
        .unwrap();
    let vm = rt.construct(tens, Vec::new()).unwrap();

    let cell = ValueCell::new(Value::Int(1));
    rt.call_method(&vm, "callIncRef", vec![Value::Ref(cell.clone())]).unwrap();
    assert_eq!(cell.get(), Value::Int(11));
}

#[test]
fn test_reference_mutation_through_nested_virtual_call() {
    let s = sample();
    let rt = &s.runtime;
    let scale_calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&scale_calls);
    let nested = rt
        .register_type(
            TypeSpec::subtype("Nested", s.types.virtual_methods)
                .override_method("incRef", |frame, args| {
                    frame.call_super(args.clone())?;
                    let this = frame.this().clone();
                    frame.call(&this, "callScaleRef", vec![args[0].clone(), Value::Int(3)])
                })
                .override_method("scaleRef", move |frame, args| {
                    *counter.lock() += 1;
                    frame.call_super(args)
                }),
        )
        .unwrap();
    let vm = rt.construct(nested, Vec::new()).unwrap();
    let handle = rt.address_of(&vm).unwrap();

    let cell = ValueCell::new(Value::Int(1));
    rt.invoke_virtual(handle, "incRef", vec![Value::Ref(cell.clone())])
        .unwrap();
    // (1 + 1) * 3, and the native caller's cell is the one that changed
    assert_eq!(cell.get(), Value::Int(6));
    assert_eq!(*scale_calls.lock(), 1);
}

#[test]
fn test_override_error_propagates_to_language_caller() {
    let s = sample();
    let rt = &s.runtime;
    let raising = rt
        .register_type(
            TypeSpec::subtype("Raising", s.types.virtual_methods)
                .override_method("sum0", |frame, _| Err(frame.raise("sum0 is broken"))),
        )
        .unwrap();
    let vm = rt.construct(raising, Vec::new()).unwrap();

    let err = rt.call_method(&vm, "callSum0", vec![Value::Int(1)]).unwrap_err();
    match err {
        BindingError::OverrideFailed {
            declared_type,
            method,
            message,
        } => {
            assert_eq!(declared_type, "Raising");
            assert_eq!(method, "sum0");
            assert_eq!(message, "sum0 is broken");
        }
        other => panic!("unexpected error: {other}"),
    }
    // The object is still usable afterwards
    assert!(rt.is_valid(&vm));
}

#[test]
fn test_override_error_as_native_signal() {
    let mut config = RuntimeConfig::default();
    config.dispatch.error_policy = OverrideErrorPolicy::NativeSignal;
    let s = Sample::with_config(config).unwrap();
    let rt = &s.runtime;
    let raising = rt
        .register_type(
            TypeSpec::subtype("Raising", s.types.virtual_methods)
                .override_method("sum0", |frame, _| Err(frame.raise("sum0 is broken"))),
        )
        .unwrap();
    let vm = rt.construct(raising, Vec::new()).unwrap();

    // The native caller receives a default value; the error comes out of the
    // language call that entered native code
    let err = rt.call_method(&vm, "callSum0", vec![Value::Int(1)]).unwrap_err();
    assert!(matches!(err, BindingError::OverrideFailed { ref message, .. } if message == "sum0 is broken"));
    // Nothing is left behind for unrelated calls
    assert_eq!(
        rt.call_method(&vm, "name", Vec::new()).unwrap(),
        Value::from("VirtualMethods")
    );
}

#[test]
fn test_native_signal_error_reaches_innermost_language_frame() {
    let mut config = RuntimeConfig::default();
    config.dispatch.error_policy = OverrideErrorPolicy::NativeSignal;
    let s = Sample::with_config(config).unwrap();
    let rt = &s.runtime;
    let caught = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&caught);
    let raising = rt
        .register_type(
            TypeSpec::subtype("Raising", s.types.virtual_methods)
                .override_method("sum0", |frame, _| Err(frame.raise("sum0 is broken")))
                .override_method("name", move |frame, args| {
                    // language -> native -> override, one level down
                    let this = frame.this().clone();
                    *slot.lock() = frame.call(&this, "callSum0", Vec::new()).err();
                    frame.call_super(args)
                }),
        )
        .unwrap();
    let vm = rt.construct(raising, Vec::new()).unwrap();

    // The outer native call completes; the inner frame got the error
    assert_eq!(
        rt.call_method(&vm, "callName", Vec::new()).unwrap(),
        Value::from("VirtualMethods")
    );
    assert!(matches!(*caught.lock(), Some(BindingError::OverrideFailed { .. })));
}

#[test]
fn test_event_argument_invalidated_after_use() {
    let s = sample();
    let rt = &s.runtime;
    let seen: Arc<Mutex<Vec<Wrapper>>> = Arc::new(Mutex::new(Vec::new()));
    let keep = Arc::clone(&seen);
    let listener = rt
        .register_type(
            TypeSpec::subtype("Listener", s.types.object_type).override_method("event", move |frame, args| {
                let event = args[0].as_object()?.clone();
                let kind = frame.call(&event, "eventType", Vec::new())?;
                keep.lock().push(event);
                Ok(Value::Bool(kind == Value::Int(7)))
            }),
        )
        .unwrap();
    let obj = rt.construct(listener, Vec::new()).unwrap();

    assert_eq!(rt.call_method(&obj, "causeEvent", vec![Value::Int(7)]).unwrap(), Value::Bool(true));
    assert_eq!(rt.call_method(&obj, "causeEvent", vec![Value::Int(1)]).unwrap(), Value::Bool(false));

    let events = seen.lock().clone();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert!(!rt.is_valid(event));
        let err = rt.call_method(event, "eventType", Vec::new()).unwrap_err();
        assert!(err.is_invalidated());
    }
}

#[test]
fn test_override_sees_same_wrapper_as_caller() {
    let s = sample();
    let rt = &s.runtime;
    let seen: Arc<Mutex<Option<Wrapper>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    let ty = rt
        .register_type(
            TypeSpec::subtype("Mirror", s.types.virtual_methods).override_method("name", move |frame, _| {
                *slot.lock() = Some(frame.this().clone());
                Ok(Value::from("mirror"))
            }),
        )
        .unwrap();
    let vm = rt.construct(ty, Vec::new()).unwrap();
    rt.call_method(&vm, "callName", Vec::new()).unwrap();

    let this = seen.lock().take().unwrap();
    assert!(this.is(&vm));
}

#[test]
fn test_language_attributes_on_subtype() {
    let s = sample();
    let rt = &s.runtime;
    let ty = rt
        .register_type(
            TypeSpec::subtype("Stateful", s.types.virtual_methods).override_method("name", |frame, _| {
                Ok(frame.this().attr("label").unwrap_or_default())
            }),
        )
        .unwrap();
    let vm = rt.construct(ty, Vec::new()).unwrap();
    vm.set_attr("label", Value::from("from attribute"));
    assert_eq!(
        rt.call_method(&vm, "callName", Vec::new()).unwrap(),
        Value::from("from attribute")
    );
}
