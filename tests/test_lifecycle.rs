use bindrt::sample::Sample;
use bindrt::{BindingError, EnumScopePolicy, Ownership, RuntimeConfig, TypeSpec, Value, Wrapper};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

fn sample() -> Sample {
    Sample::new().unwrap()
}

#[test]
fn test_attach_then_delete_container() {
    let s = sample();
    let rt = &s.runtime;

    let container = s.create_object(None).unwrap();
    assert_eq!(rt.ownership(&container).unwrap(), Ownership::NativeOwned);

    let a = rt.construct(s.types.object_type, Vec::new()).unwrap();
    assert!(rt.is_language_owned(&a));
    assert!(rt.created_by_language(&a));

    rt.call_method(&a, "setParent", vec![Value::Object(container.clone())])
        .unwrap();
    assert_eq!(rt.ownership(&a).unwrap(), Ownership::NativeOwned);
    assert!(rt.parent_of(&a).unwrap().is(&container));

    s.destroy(&container).unwrap();
    assert!(!rt.is_valid(&a));
    assert!(!rt.is_valid(&container));

    let err = rt.call_method(&a, "objectName", Vec::new()).unwrap_err();
    assert!(matches!(
        err,
        BindingError::InvalidatedObject { ref declared_type, .. } if declared_type == "ObjectType"
    ));
}

#[test]
fn test_reattach_same_parent_is_noop() {
    let s = sample();
    let rt = &s.runtime;
    let parent = s.create_object(None).unwrap();
    let child = rt.construct(s.types.object_type, Vec::new()).unwrap();

    let set_parent = || {
        rt.call_method(&child, "setParent", vec![Value::Object(parent.clone())])
            .unwrap()
    };
    set_parent();
    let refs = child.ref_count();
    let snapshot = rt.snapshot(&child).unwrap();
    set_parent();

    assert_eq!(child.ref_count(), refs);
    assert_eq!(rt.snapshot(&child).unwrap(), snapshot);
    assert_eq!(rt.children_of(&parent).len(), 1);
}

#[test]
fn test_unparent_returns_to_language() {
    let s = sample();
    let rt = &s.runtime;
    let parent = s.create_object(None).unwrap();
    let child = rt
        .construct(s.types.object_type, vec![Value::Object(parent.clone())])
        .unwrap();
    assert_eq!(rt.ownership(&child).unwrap(), Ownership::NativeOwned);

    rt.call_method(&child, "setParent", vec![Value::None]).unwrap();
    assert!(rt.is_language_owned(&child));
    assert!(rt.parent_of(&child).is_none());

    // Language side owns it again, so dropping it destroys the native object
    let handle = rt.address_of(&child).unwrap();
    drop(child);
    assert!(!s.framework.is_alive(handle));
}

#[test]
fn test_cascade_through_nested_children() {
    let s = sample();
    let rt = &s.runtime;
    let root = s.create_object(None).unwrap();

    let child = rt.call_method(&root, "createChild", vec![Value::from("child")]).unwrap();
    let child = child.as_object().unwrap().clone();
    let grandchild = rt
        .call_method(&child, "createChild", vec![Value::from("grandchild")])
        .unwrap();
    let grandchild = grandchild.as_object().unwrap().clone();

    assert!(rt.parent_of(&grandchild).unwrap().is(&child));
    assert_eq!(rt.ownership(&grandchild).unwrap(), Ownership::NativeOwned);

    let found = rt.call_method(&root, "findChild", vec![Value::from("child")]).unwrap();
    assert!(found.as_object().unwrap().is(&child));
    assert!(rt
        .call_method(&root, "findChild", vec![Value::from("missing")])
        .unwrap()
        .is_none());

    s.destroy(&root).unwrap();
    for w in [&root, &child, &grandchild] {
        assert!(!rt.is_valid(w));
    }
    assert_eq!(s.framework.object_count(), 0);
}

#[test]
fn test_delete_children_from_native() {
    let s = sample();
    let rt = &s.runtime;
    let root = s.create_object(None).unwrap();
    let kids: Vec<Wrapper> = (0..3)
        .map(|_| s.create_object(Some(&root)).unwrap())
        .collect();
    assert_eq!(rt.call_method(&root, "childCount", Vec::new()).unwrap(), Value::Int(3));

    rt.call_method(&root, "deleteChildren", Vec::new()).unwrap();
    assert!(kids.iter().all(|k| !rt.is_valid(k)));
    assert!(rt.is_valid(&root));
    assert!(rt.children_of(&root).is_empty());
}

#[test]
fn test_delete_wrapper_forces_native_deletion() {
    let s = sample();
    let rt = &s.runtime;
    let a = rt.construct(s.types.object_type, Vec::new()).unwrap();
    let handle = rt.address_of(&a).unwrap();

    rt.delete_wrapper(&a).unwrap();
    assert!(!rt.is_valid(&a));
    assert!(!s.framework.is_alive(handle));
    assert!(rt.delete_wrapper(&a).unwrap_err().is_invalidated());

    let native = s.create_object(None).unwrap();
    let err = rt.delete_wrapper(&native).unwrap_err();
    assert!(matches!(err, BindingError::OwnershipConflict { .. }));
    assert!(rt.is_valid(&native));
}

#[test]
fn test_wrap_existing_handle_reuses_wrapper() {
    let s = sample();
    let rt = &s.runtime;
    let a = s.create_object(None).unwrap();
    let handle = rt.address_of(&a).unwrap();

    let again = rt.wrap_existing_handle(handle, s.types.object_type).unwrap();
    assert!(again.is(&a));
    assert_eq!(rt.live_count(), 1);
}

#[test]
fn test_unreported_free_leaves_dangling_identity() {
    let s = sample();
    let rt = &s.runtime;
    let a = rt.construct(s.types.object_type, Vec::new()).unwrap();
    let handle = s.leak(&a).unwrap();

    // The address is reused while the stale wrapper still claims it
    let err = rt.construct(s.types.object_type, Vec::new()).unwrap_err();
    match err {
        BindingError::DuplicateRegistration { handle: h, .. } => assert_eq!(h, handle),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_reported_free_allows_address_reuse() {
    let s = sample();
    let rt = &s.runtime;
    let a = rt.construct(s.types.object_type, Vec::new()).unwrap();
    let handle = rt.address_of(&a).unwrap();
    s.destroy(&a).unwrap();

    let b = rt.construct(s.types.object_type, Vec::new()).unwrap();
    assert_eq!(rt.address_of(&b).unwrap(), handle);
    assert!(!b.is(&a));
    assert!(!rt.is_valid(&a));
    assert!(rt.lookup(handle).unwrap().is(&b));
}

#[test]
fn test_dying_wrapper_never_reaches_reused_address() {
    let s = sample();
    let rt = &s.runtime;
    let framework = Arc::clone(&s.framework);
    let plain = s.types.virtual_methods;
    let replacement: Arc<Mutex<Option<Wrapper>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&replacement);
    let self_destruct = rt
        .register_type(TypeSpec::subtype("SelfDestruct", plain).override_method("sum0", move |frame, _| {
            let rt = frame.runtime();
            let this = frame.this().clone();
            let handle = rt.address_of(&this)?;
            framework.destroy(handle);

            let other = rt.construct(plain, vec![Value::from("other object")])?;
            assert_eq!(rt.address_of(&other)?, handle);
            assert!(frame.call(&this, "name", Vec::new()).unwrap_err().is_invalidated());
            assert!(frame.call_super(Vec::new()).unwrap_err().is_invalidated());
            assert_eq!(frame.call(&other, "name", Vec::new())?, Value::from("other object"));
            *slot.lock() = Some(other);
            Ok(Value::Int(0))
        }))
        .unwrap();
    let vm = rt.construct(self_destruct, Vec::new()).unwrap();
    let handle = rt.address_of(&vm).unwrap();

    assert_eq!(rt.call_method(&vm, "callSum0", Vec::new()).unwrap(), Value::Int(0));
    assert!(!rt.is_valid(&vm));
    assert!(rt.call_method(&vm, "name", Vec::new()).unwrap_err().is_invalidated());

    let other = replacement.lock().take().unwrap();
    assert!(rt.lookup(handle).unwrap().is(&other));
    assert_eq!(rt.call_method(&other, "name", Vec::new()).unwrap(), Value::from("other object"));
}

#[test]
fn test_private_destructor_singleton_does_not_leak() {
    let s = sample();
    let rt = &s.runtime;
    let desc = rt.type_descriptor(s.types.private_dtor).unwrap();
    let before = Arc::strong_count(&desc);

    for _ in 0..1000 {
        let w = s.private_dtor_instance().unwrap();
        rt.call_method(&w, "instanceCalls", Vec::new()).unwrap();
        rt.invalidate(&w).unwrap();
    }

    let after = Arc::strong_count(&desc);
    assert!(after.abs_diff(before) < 5, "type references went from {before} to {after}");

    let w = s.private_dtor_instance().unwrap();
    assert_eq!(rt.call_method(&w, "instanceCalls", Vec::new()).unwrap(), Value::Int(1001));
}

#[test]
fn test_private_destructor_forbids_construction() {
    let s = sample();
    let rt = &s.runtime;
    let err = rt.construct(s.types.private_dtor, Vec::new()).unwrap_err();
    assert!(matches!(err, BindingError::ConstructionForbidden { .. }));

    let err = rt
        .register_type(TypeSpec::subtype("MyPrivate", s.types.private_dtor))
        .unwrap_err();
    assert!(matches!(err, BindingError::ConstructionForbidden { .. }));
}

#[test]
fn test_abstract_type_cannot_be_constructed() {
    let s = sample();
    let err = s.runtime.construct(s.types.base1, Vec::new()).unwrap_err();
    assert!(matches!(err, BindingError::ConstructionForbidden { .. }));
}

#[test]
fn test_deferred_delete() {
    let s = sample();
    let rt = &s.runtime;
    let a = rt.construct(s.types.object_type, Vec::new()).unwrap();
    let handle = rt.address_of(&a).unwrap();

    rt.delete_later(&a).unwrap();
    assert!(rt.is_valid(&a));
    assert_eq!(rt.ownership(&a).unwrap(), Ownership::NativeOwned);

    assert_eq!(rt.process_deferred_deletes(), 1);
    assert!(!rt.is_valid(&a));
    assert!(!s.framework.is_alive(handle));
}

#[test]
fn test_value_type_stays_language_owned() {
    let s = sample();
    let rt = &s.runtime;
    let p = rt
        .construct(s.types.point, vec![Value::Float(1.5), Value::Float(2.0)])
        .unwrap();
    rt.transfer_to_native(&p).unwrap();
    assert!(rt.is_language_owned(&p));
    rt.call_method(&p, "setX", vec![Value::Float(3.0)]).unwrap();
    assert_eq!(rt.call_method(&p, "x", Vec::new()).unwrap(), Value::Float(3.0));
}

#[test]
fn test_all_live_wrappers_restartable() {
    let s = sample();
    let rt = &s.runtime;
    let objects: Vec<Wrapper> = (0..4).map(|_| s.create_object(None).unwrap()).collect();

    let mut live = rt.all_live_wrappers();
    assert_eq!(live.by_ref().count(), 4);
    s.destroy(&objects[0]).unwrap();
    live.restart();
    assert_eq!(live.count(), 3);
}

#[test]
fn test_dump_reports_state() {
    let s = sample();
    let rt = &s.runtime;
    let parent = s.create_object(None).unwrap();
    let child = s.create_object(Some(&parent)).unwrap();

    let dump = rt.dump(&child);
    assert!(dump.contains("[native-owned]"));
    assert!(dump.contains(&format!("parent={}", parent.id())));
    assert!(rt.dump(&parent).contains(&format!("children=[{}]", child.id())));

    s.destroy(&parent).unwrap();
    assert!(rt.dump(&child).contains("[deleted]"));
}

#[test]
fn test_nested_enum_scope_policy() {
    let immediate = sample();
    let meta = immediate.runtime.types().enums_of(immediate.types.inner_class);
    assert_eq!(immediate.runtime.types().enum_scope(&meta[0]), "InnerClass");

    let mut config = RuntimeConfig::default();
    config.naming.enum_scope = EnumScopePolicy::Qualified;
    let qualified = Sample::with_config(config).unwrap();
    let meta = qualified.runtime.types().enums_of(qualified.types.inner_class);
    assert_eq!(qualified.runtime.types().enum_scope(&meta[0]), "SomeClass.InnerClass");
    assert_eq!(meta[0].value("ShapeTypeTwo"), Some(1));
}

#[test]
fn test_shutdown_destroys_language_owned_roots() {
    let s = sample();
    let rt = &s.runtime;
    let owned = rt.construct(s.types.object_type, Vec::new()).unwrap();
    let native = s.create_object(None).unwrap();
    let owned_handle = rt.address_of(&owned).unwrap();
    let native_handle = rt.address_of(&native).unwrap();

    rt.shutdown();
    assert!(!s.framework.is_alive(owned_handle));
    assert!(s.framework.is_alive(native_handle));
    assert_eq!(rt.live_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_one_live_wrapper_per_address(ops in prop::collection::vec(0u8..4, 1..60)) {
        let s = sample();
        let rt = &s.runtime;
        let mut pool: Vec<Wrapper> = Vec::new();
        let mut dead: Vec<Wrapper> = Vec::new();

        for op in ops {
            match op {
                0 => pool.push(rt.construct(s.types.object_type, Vec::new()).unwrap()),
                1 => pool.push(s.create_object(None).unwrap()),
                2 => {
                    if let Some(w) = pool.pop() {
                        s.destroy(&w).unwrap();
                        dead.push(w);
                    }
                }
                _ => {
                    if !pool.is_empty() {
                        let w = pool.remove(0);
                        if rt.is_language_owned(&w) {
                            rt.delete_wrapper(&w).unwrap();
                        } else {
                            s.destroy(&w).unwrap();
                        }
                        dead.push(w);
                    }
                }
            }

            for w in &pool {
                let handle = rt.address_of(w).unwrap();
                let found = rt.lookup(handle).unwrap();
                prop_assert!(found.is(w));
            }
            for w in &dead {
                prop_assert!(!rt.is_valid(w));
            }
            prop_assert_eq!(rt.live_count(), pool.len());
        }
    }
}
