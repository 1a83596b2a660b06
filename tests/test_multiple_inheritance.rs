use bindrt::sample::{Sample, MDERIVED1_BASE2_OFFSET};
use bindrt::{BindingError, CastFailure, TypeSpec, Value};

fn sample() -> Sample {
    Sample::new().unwrap()
}

#[test]
fn test_cast_to_second_base_keeps_identity() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();

    let as_base2 = rt.cast_to(&w, s.types.base2).unwrap();
    assert!(as_base2.is(&w));
    assert_eq!(as_base2.view(), s.types.base2);
    assert_eq!(rt.address_of(&as_base2).unwrap(), primary.offset(MDERIVED1_BASE2_OFFSET));

    let as_base1 = rt.cast_to(&w, s.types.base1).unwrap();
    assert_eq!(rt.address_of(&as_base1).unwrap(), primary);
}

#[test]
fn test_round_trip_cast_returns_original_wrapper() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let live = rt.live_count();

    let up = rt.cast_to(&w, s.types.base1).unwrap();
    let down = rt.cast_to(&up, s.types.mderived1).unwrap();
    assert!(down.is(&w));
    assert_eq!(rt.address_of(&down).unwrap(), rt.address_of(&w).unwrap());
    assert_eq!(rt.live_count(), live);
}

#[test]
fn test_native_upcast_returns_existing_wrapper() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();

    let base2 = rt.call_method(&w, "castToBase2", Vec::new()).unwrap();
    let base2 = base2.as_object().unwrap();
    assert!(base2.is(&w));
    assert_eq!(base2.view(), s.types.base2);

    let base1 = rt.call_method(&w, "castToBase1", Vec::new()).unwrap();
    assert!(base1.as_object().unwrap().is(&w));

    // Base2 methods still work through the re-typed view
    assert_eq!(rt.call_method(base2, "base2Method", Vec::new()).unwrap(), Value::Int(2));
    assert_eq!(rt.lookup(primary.offset(MDERIVED1_BASE2_OFFSET)).unwrap(), w);
}

#[test]
fn test_sub_object_pointer_passed_to_native() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();
    let base2 = rt.cast_to(&w, s.types.base2).unwrap();

    let addr = rt
        .call_method(&w, "base2Address", vec![Value::Object(base2.clone())])
        .unwrap();
    assert_eq!(addr, Value::Int(primary.offset(MDERIVED1_BASE2_OFFSET).addr() as i64));

    let back = rt
        .call_method(&w, "transformFromBase2", vec![Value::Object(base2)])
        .unwrap();
    let back = back.as_object().unwrap();
    assert!(back.is(&w));
    assert_eq!(back.view(), s.types.mderived1);
}

#[test]
fn test_every_sub_object_address_resolves() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();

    assert_eq!(
        rt.sub_object_addresses(&w).unwrap(),
        vec![primary, primary.offset(MDERIVED1_BASE2_OFFSET)]
    );
    for addr in rt.sub_object_addresses(&w).unwrap() {
        assert!(rt.lookup(addr).unwrap().is(&w));
    }
}

#[test]
fn test_cast_to_unrelated_type_fails() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();

    match rt.cast_to(&w, s.types.bucket).unwrap_err() {
        BindingError::CastResolution {
            declared_type,
            target_type,
            reason,
        } => {
            assert_eq!(declared_type, "MDerived1");
            assert_eq!(target_type, "Bucket");
            assert_eq!(reason, CastFailure::Unreachable);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_diamond_shared_root() {
    let s = sample();
    let rt = &s.runtime;
    let d = rt.construct(s.types.diamond, Vec::new()).unwrap();
    let primary = rt.address_of(&d).unwrap();

    let root = rt.cast_to(&d, s.types.diamond_root).unwrap();
    assert_eq!(rt.address_of(&root).unwrap(), primary.offset(8));
    let right = rt.cast_to(&d, s.types.diamond_right).unwrap();
    assert_eq!(rt.address_of(&right).unwrap(), primary.offset(24));

    let from_native = rt.call_method(&d, "castToRoot", Vec::new()).unwrap();
    let from_native = from_native.as_object().unwrap();
    assert!(from_native.is(&d));
    assert_eq!(from_native.view(), s.types.diamond_root);

    assert_eq!(
        rt.sub_object_addresses(&d).unwrap(),
        vec![primary, primary.offset(8), primary.offset(24)]
    );
}

#[test]
fn test_cast_cache_hits_on_repeat() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();

    let before = rt.cast_stats();
    rt.cast_to(&w, s.types.base2).unwrap();
    rt.cast_to(&w, s.types.base2).unwrap();
    rt.cast_to(&w, s.types.base2).unwrap();
    let after = rt.cast_stats();

    assert!(after.hits >= before.hits + 2);
    assert!(after.cached >= 1);
}

#[test]
fn test_cast_cache_not_stale_after_address_reuse() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();
    rt.cast_to(&w, s.types.base2).unwrap();
    rt.delete_wrapper(&w).unwrap();
    drop(w);

    let d = rt.construct(s.types.diamond, Vec::new()).unwrap();
    assert_eq!(rt.address_of(&d).unwrap(), primary);
    let right = rt.cast_to(&d, s.types.diamond_right).unwrap();
    assert_eq!(rt.address_of(&right).unwrap(), primary.offset(24));
    assert!(rt.lookup(primary.offset(MDERIVED1_BASE2_OFFSET)).is_none());
}

#[test]
fn test_query_type_identity_lists_ancestors() {
    let s = sample();
    let rt = &s.runtime;
    let w = rt.construct(s.types.mderived1, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();

    let identity = rt.query_type_identity(primary);
    assert_eq!(identity[0], s.types.mderived1);
    assert!(identity.contains(&s.types.base1));
    assert!(identity.contains(&s.types.base2));
    assert!(rt.query_type_identity(primary.offset(-0x1000)).is_empty());
}

#[test]
fn test_language_subtype_of_multiple_derived() {
    let s = sample();
    let rt = &s.runtime;
    let sub = rt
        .register_type(
            TypeSpec::subtype("Derived", s.types.mderived1)
                .override_method("base2Method", |frame, args| {
                    let base = frame.call_super(args)?.as_int()?;
                    Ok(Value::Int(base * 100))
                }),
        )
        .unwrap();
    let w = rt.construct(sub, Vec::new()).unwrap();
    let primary = rt.address_of(&w).unwrap();

    assert_eq!(rt.call_method(&w, "callBase2Method", Vec::new()).unwrap(), Value::Int(200));
    assert_eq!(rt.call_method(&w, "callBase1Method", Vec::new()).unwrap(), Value::Int(1));

    let base2 = rt.cast_to(&w, s.types.base2).unwrap();
    assert_eq!(rt.address_of(&base2).unwrap(), primary.offset(MDERIVED1_BASE2_OFFSET));
    // Overrides follow the object, not the view
    assert_eq!(rt.call_method(&base2, "base2Method", Vec::new()).unwrap(), Value::Int(200));
}
