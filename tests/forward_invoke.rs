//! End-to-end forward invocations against real native entry points.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use nid_bridge::prelude::*;
use nid_bridge::{Error, closure};

#[test]
fn out_argument_yields_result_without_consuming_host_value() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("double_into", CallableKind::Function)
            .arg(ArgDesc::new("a", TypeDesc::I32))
            .arg(ArgDesc::new("b", TypeDesc::I32).out())
            .address(double_into as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge.call(id, &[HostValue::Int(5)]).unwrap();
    assert_eq!(results, vec![HostValue::Int(10)]);
}

#[test]
fn host_values_shift_past_out_arguments() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("add_between", CallableKind::Function)
            .arg(ArgDesc::new("a", TypeDesc::I32))
            .arg(ArgDesc::new("b", TypeDesc::I32).out())
            .arg(ArgDesc::new("c", TypeDesc::I32))
            .address(add_between as usize),
    );
    let bridge = bridge_with(catalog);

    // The out slot consumes no host value: the second host value lands in
    // the third native argument.
    let results = bridge
        .call(id, &[HostValue::Int(2), HostValue::Int(40)])
        .unwrap();
    assert_eq!(results, vec![HostValue::Int(42)]);
}

#[test]
fn inout_argument_is_read_and_written() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("negate_inout", CallableKind::Function)
            .arg(ArgDesc::new("p", TypeDesc::I32).inout())
            .address(negate_inout as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge.call(id, &[HostValue::Int(5)]).unwrap();
    assert_eq!(results, vec![HostValue::Int(-5)]);
}

#[test]
fn zero_terminated_array_sums() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("sum_zero_terminated", CallableKind::Function)
            .arg(ArgDesc::new(
                "values",
                TypeDesc::Array(ArrayDesc::new(TypeDesc::I32, ArrayLength::ZeroTerminated)),
            ))
            .returns(TypeDesc::I32, Transfer::None)
            .address(sum_zero_terminated as usize),
    );
    let bridge = bridge_with(catalog);

    let values = HostValue::List(vec![1.into(), 2.into(), 3.into()]);
    let results = bridge.call(id, &[values]).unwrap();
    assert_eq!(results, vec![HostValue::Int(6)]);
}

#[test]
fn automatic_length_argument_is_filled_from_sequence() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("sum_counted", CallableKind::Function)
            .arg(ArgDesc::new(
                "values",
                TypeDesc::Array(ArrayDesc::new(TypeDesc::I32, ArrayLength::Arg(1))),
            ))
            .arg(ArgDesc::new("n", TypeDesc::U64))
            .returns(TypeDesc::I64, Transfer::None)
            .address(sum_counted as usize),
    );
    let bridge = bridge_with(catalog);

    // One host value only: the length has no host-side counterpart.
    let values = HostValue::List(vec![10.into(), 20.into(), 12.into()]);
    let results = bridge.call(id, &[values]).unwrap();
    assert_eq!(results, vec![HostValue::Int(42)]);
}

#[test]
fn strings_cross_both_ways() {
    let mut catalog = Catalog::new();
    let len_id = catalog.add_callable(
        CallableDesc::new("string_len", CallableKind::Function)
            .arg(ArgDesc::new("s", TypeDesc::Utf8))
            .returns(TypeDesc::I32, Transfer::None)
            .address(string_len as usize),
    );
    let concat_id = catalog.add_callable(
        CallableDesc::new("concat_strings", CallableKind::Function)
            .arg(ArgDesc::new("a", TypeDesc::Utf8))
            .arg(ArgDesc::new("b", TypeDesc::Utf8))
            .returns(TypeDesc::Utf8, Transfer::Full)
            .address(concat_strings as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge.call(len_id, &[HostValue::from("héllo")]).unwrap();
    assert_eq!(results, vec![HostValue::Int(6)]); // bytes, not chars

    let results = bridge
        .call(concat_id, &[HostValue::from("foo"), HostValue::from("bar")])
        .unwrap();
    assert_eq!(results, vec![HostValue::from("foobar")]);
}

#[test]
fn missing_mandatory_argument_is_rejected() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("string_len", CallableKind::Function)
            .arg(ArgDesc::new("s", TypeDesc::Utf8))
            .returns(TypeDesc::I32, Transfer::None)
            .address(string_len as usize),
    );
    let bridge = bridge_with(catalog);

    let err = bridge.call(id, &[]).unwrap_err();
    assert!(matches!(
        err,
        Error::Invoke(InvokeError::Marshal(MarshalError::MissingValue { .. }))
            | Error::Marshal(MarshalError::MissingValue { .. })
    ));
}

#[test]
fn nullable_string_passes_null() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("string_len", CallableKind::Function)
            .arg(ArgDesc::new("s", TypeDesc::Utf8).nullable())
            .returns(TypeDesc::I32, Transfer::None)
            .address(string_len as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge.call(id, &[HostValue::Undef]).unwrap();
    assert_eq!(results, vec![HostValue::Int(-1)]);
}

#[test]
fn native_error_slot_aborts_with_reported_error() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("checked_divide", CallableKind::Function)
            .arg(ArgDesc::new("a", TypeDesc::I32))
            .arg(ArgDesc::new("b", TypeDesc::I32))
            .returns(TypeDesc::I32, Transfer::None)
            .throws()
            .address(checked_divide as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge
        .call(id, &[HostValue::Int(12), HostValue::Int(3)])
        .unwrap();
    assert_eq!(results, vec![HostValue::Int(4)]);

    let err = bridge
        .call(id, &[HostValue::Int(12), HostValue::Int(0)])
        .unwrap_err();
    match err {
        Error::Invoke(InvokeError::NativeReportedError { code, message }) => {
            assert_eq!(code, 11);
            assert_eq!(message, "division by zero");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn raw_record_arguments_and_returns_use_host_maps() {
    let mut catalog = Catalog::new();
    let point = add_point_record(&mut catalog);
    let make_id = catalog.add_callable(
        CallableDesc::new("make_point", CallableKind::Function)
            .arg(ArgDesc::new("x", TypeDesc::I32))
            .arg(ArgDesc::new("y", TypeDesc::I32))
            .returns(TypeDesc::Record(point), Transfer::Full)
            .address(make_point as usize),
    );
    let norm_id = catalog.add_callable(
        CallableDesc::new("point_norm2", CallableKind::Function)
            .arg(ArgDesc::new("p", TypeDesc::Record(point)))
            .returns(TypeDesc::I64, Transfer::None)
            .address(point_norm2 as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge
        .call(make_id, &[HostValue::Int(3), HostValue::Int(4)])
        .unwrap();
    let expected = HostValue::Map(vec![
        ("x".into(), HostValue::Int(3)),
        ("y".into(), HostValue::Int(4)),
    ]);
    assert_eq!(results, vec![expected.clone()]);

    let results = bridge.call(norm_id, &[expected]).unwrap();
    assert_eq!(results, vec![HostValue::Int(25)]);
}

#[test]
fn caller_allocated_out_record_is_returned() {
    let mut catalog = Catalog::new();
    let point = add_point_record(&mut catalog);
    let id = catalog.add_callable(
        CallableDesc::new("out_point", CallableKind::Function)
            .arg(
                ArgDesc::new("p", TypeDesc::Record(point))
                    .out()
                    .caller_allocates(),
            )
            .address(out_point as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge.call(id, &[]).unwrap();
    assert_eq!(
        results,
        vec![HostValue::Map(vec![
            ("x".into(), HostValue::Int(7)),
            ("y".into(), HostValue::Int(9)),
        ])]
    );
}

#[test]
fn list_chain_reaches_native_intact() {
    let mut catalog = Catalog::new();
    let id = catalog.add_callable(
        CallableDesc::new("list_sum", CallableKind::Function)
            .arg(ArgDesc::new("values", TypeDesc::List(Box::new(TypeDesc::I64))))
            .returns(TypeDesc::I64, Transfer::None)
            .address(list_sum as usize),
    );
    let bridge = bridge_with(catalog);

    let values = HostValue::List(vec![5.into(), 6.into(), 7.into()]);
    let results = bridge.call(id, &[values]).unwrap();
    assert_eq!(results, vec![HostValue::Int(18)]);
}

#[test]
fn constructor_and_method_use_object_wrappers() {
    let mut catalog = Catalog::new();
    let class = catalog.add_class(ClassDesc {
        name: "Counter".to_string(),
        ref_fn: Some(counter_ref),
        unref_fn: Some(counter_unref),
        ref_count_fn: Some(counter_refs),
        initially_unowned: false,
    });
    let new_id = catalog.add_callable(
        CallableDesc::new("counter_new", CallableKind::Constructor)
            .container(ContainerRef::Class(class))
            .returns(TypeDesc::Object(class), Transfer::Full)
            .address(counter_new as usize),
    );
    let add_id = catalog.add_callable(
        CallableDesc::new("counter_add", CallableKind::Method)
            .container(ContainerRef::Class(class))
            .arg(ArgDesc::new("delta", TypeDesc::I64))
            .returns(TypeDesc::I64, Transfer::None)
            .address(counter_add as usize),
    );
    let bridge = bridge_with(catalog);

    // The leading host argument of a constructor is the class; it occupies
    // no native slot.
    let results = bridge.call(new_id, &[HostValue::from("Counter")]).unwrap();
    let counter = results.into_iter().next().unwrap();
    assert!(matches!(counter, HostValue::Object(_)));

    let results = bridge
        .call(add_id, &[counter.clone(), HostValue::Int(5)])
        .unwrap();
    assert_eq!(results, vec![HostValue::Int(5)]);
    let results = bridge
        .call(add_id, &[counter, HostValue::Int(2)])
        .unwrap();
    assert_eq!(results, vec![HostValue::Int(7)]);
}

#[test]
fn enum_arguments_convert_symbolically_at_storage_width() {
    let mut catalog = Catalog::new();
    let color = catalog.add_enum(
        "color",
        TypeDesc::U8,
        &[("red", 0), ("green", 1), ("blue", 2)],
        false,
    );
    unsafe extern "C" fn next_color(c: u8) -> u8 {
        (c + 1) % 3
    }
    let id = catalog.add_callable(
        CallableDesc::new("next_color", CallableKind::Function)
            .arg(ArgDesc::new("c", TypeDesc::Enum(color)))
            .returns(TypeDesc::Enum(color), Transfer::None)
            .address(next_color as usize),
    );
    let bridge = bridge_with(catalog);

    let results = bridge.call(id, &[HostValue::from("red")]).unwrap();
    assert_eq!(results, vec![HostValue::from("green")]);
    let results = bridge.call(id, &[HostValue::Int(2)]).unwrap();
    assert_eq!(results, vec![HostValue::from("red")]);
}

#[test]
fn call_scoped_callback_runs_and_is_released() {
    let _guard = closure_lock();
    let mut catalog = Catalog::new();
    let cb_sig = add_callback_signature(&mut catalog);
    let id = catalog.add_callable(
        CallableDesc::new("apply_twice", CallableKind::Function)
            .arg(
                ArgDesc::new("cb", TypeDesc::Callback(cb_sig))
                    .callback_positions(Some(1), None, ScopePolicy::Call),
            )
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .arg(ArgDesc::new("x", TypeDesc::I32))
            .returns(TypeDesc::I32, Transfer::None)
            .address(apply_twice as usize),
    );
    let bridge = bridge_with(catalog);
    let baseline = closure::live_count();

    let seen_data = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&seen_data);
    let cb = HostValue::callable(move |args| {
        // (x, user data) per the callback signature
        if args.get(1).map(|d| d.is_defined()).unwrap_or(false) {
            seen.fetch_add(1, Ordering::Relaxed);
        }
        Ok(vec![HostValue::Int(args[0].as_i64() + 1)])
    });

    let results = bridge
        .call(id, &[cb, HostValue::from("ctx"), HostValue::Int(20)])
        .unwrap();
    // (20 + 1) * 2
    assert_eq!(results, vec![HostValue::Int(42)]);
    assert_eq!(seen_data.load(Ordering::Relaxed), 2);
    assert_eq!(closure::live_count(), baseline);
}

#[test]
fn call_scoped_callback_is_released_exactly_once_on_abort() {
    let _guard = closure_lock();
    let mut catalog = Catalog::new();
    let cb_sig = add_callback_signature(&mut catalog);
    unsafe extern "C" fn never_called(_cb: *mut std::ffi::c_void, _data: *mut std::ffi::c_void, _s: *const std::ffi::c_char) {
        unreachable!("marshaling must abort before the call");
    }
    let id = catalog.add_callable(
        CallableDesc::new("never_called", CallableKind::Function)
            .arg(
                ArgDesc::new("cb", TypeDesc::Callback(cb_sig))
                    .callback_positions(Some(1), None, ScopePolicy::Call),
            )
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .arg(ArgDesc::new("s", TypeDesc::Utf8))
            .address(never_called as usize),
    );
    let bridge = bridge_with(catalog);
    let baseline = closure::live_count();

    let cb = HostValue::callable(|_| Ok(vec![HostValue::Int(0)]));
    // The mandatory string is absent: marshaling aborts after the callback
    // argument was registered.
    let err = bridge
        .call(id, &[cb, HostValue::Undef, HostValue::Undef])
        .unwrap_err();
    assert!(matches!(err, Error::Marshal(MarshalError::MissingValue { .. })));
    assert_eq!(closure::live_count(), baseline);
}

#[test]
fn notified_callback_outlives_call_until_native_notify() {
    let _guard = closure_lock();
    let mut catalog = Catalog::new();
    let cb_sig = add_callback_signature(&mut catalog);
    let notify_sig = add_notify_signature(&mut catalog);
    let store_id = catalog.add_callable(
        CallableDesc::new("store_callback", CallableKind::Function)
            .arg(
                ArgDesc::new("cb", TypeDesc::Callback(cb_sig))
                    .callback_positions(Some(1), Some(2), ScopePolicy::Notified),
            )
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .arg(ArgDesc::new("notify", TypeDesc::Callback(notify_sig)))
            .address(store_callback as usize),
    );
    let invoke_id = catalog.add_callable(
        CallableDesc::new("invoke_stored", CallableKind::Function)
            .arg(ArgDesc::new("x", TypeDesc::I32))
            .returns(TypeDesc::I32, Transfer::None)
            .address(invoke_stored as usize),
    );
    let release_id = catalog.add_callable(
        CallableDesc::new("release_stored", CallableKind::Function)
            .address(release_stored as usize),
    );
    let bridge = bridge_with(catalog);
    let baseline = closure::live_count();

    let cb = HostValue::callable(|args| Ok(vec![HostValue::Int(args[0].as_i64() * 10)]));
    bridge
        .call(store_id, &[cb, HostValue::Int(0), HostValue::Undef])
        .unwrap();

    // The trampoline survives the registering call.
    assert_eq!(closure::live_count(), baseline + 1);
    let (cb_ptr, _, notify_ptr) = stored_parts();
    assert_ne!(cb_ptr, 0);
    assert_eq!(notify_ptr, nid_bridge::trampoline_release as usize);

    let results = bridge.call(invoke_id, &[HostValue::Int(4)]).unwrap();
    assert_eq!(results, vec![HostValue::Int(40)]);

    // Native destroy notification releases exactly this trampoline.
    bridge.call(release_id, &[]).unwrap();
    assert_eq!(closure::live_count(), baseline);
}

#[test]
fn absent_callback_installs_null_code_and_null_notify() {
    let _guard = closure_lock();
    let mut catalog = Catalog::new();
    let cb_sig = add_callback_signature(&mut catalog);
    let notify_sig = add_notify_signature(&mut catalog);
    let store_id = catalog.add_callable(
        CallableDesc::new("store_callback", CallableKind::Function)
            .arg(
                ArgDesc::new("cb", TypeDesc::Callback(cb_sig))
                    .nullable()
                    .callback_positions(Some(1), Some(2), ScopePolicy::Notified),
            )
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .arg(ArgDesc::new("notify", TypeDesc::Callback(notify_sig)))
            .address(store_callback as usize),
    );
    let bridge = bridge_with(catalog);

    bridge
        .call(store_id, &[HostValue::Undef, HostValue::Undef, HostValue::Undef])
        .unwrap();
    let (cb_ptr, _data, notify_ptr) = stored_parts();
    assert_eq!(cb_ptr, 0);
    // Null, not the release entry: there is nothing to destroy.
    assert_eq!(notify_ptr, 0);
}

#[test]
fn reentrant_callback_may_invoke_forward_calls() {
    let mut catalog = Catalog::new();
    let cb_sig = add_callback_signature(&mut catalog);
    let apply_id = catalog.add_callable(
        CallableDesc::new("apply_twice", CallableKind::Function)
            .arg(
                ArgDesc::new("cb", TypeDesc::Callback(cb_sig))
                    .callback_positions(Some(1), None, ScopePolicy::Call),
            )
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .arg(ArgDesc::new("x", TypeDesc::I32))
            .returns(TypeDesc::I32, Transfer::None)
            .address(apply_twice as usize),
    );
    let len_id = catalog.add_callable(
        CallableDesc::new("string_len", CallableKind::Function)
            .arg(ArgDesc::new("s", TypeDesc::Utf8))
            .returns(TypeDesc::I32, Transfer::None)
            .address(string_len as usize),
    );
    let bridge = bridge_with(catalog);

    let nested = bridge.clone();
    let cb = HostValue::callable(move |args| {
        // A native call issued from inside a reverse invocation.
        let len = nested
            .call(len_id, &[HostValue::from("four")])
            .map(|r| r[0].as_i64())
            .unwrap_or(-100);
        Ok(vec![HostValue::Int(args[0].as_i64() + len)])
    });

    let results = bridge
        .call(apply_id, &[cb, HostValue::Undef, HostValue::Int(1)])
        .unwrap();
    // (1 + 4) * 2
    assert_eq!(results, vec![HostValue::Int(10)]);
}
