//! Property-based round-trip tests for the value marshaler.
//!
//! For every primitive tag and representable value, converting a host value
//! to a native slot and back under no-transfer ownership is the identity.

mod common;

use common::bridge_with;
use nid_bridge::prelude::*;
use proptest::prelude::*;

fn roundtrip(bridge: &Bridge, value: HostValue, ty: &TypeDesc) -> HostValue {
    let slot = value_to_native(bridge, &value, ty, Transfer::None, false).unwrap();
    native_to_value(bridge, &slot, ty, Transfer::None)
        .unwrap()
        .unwrap()
}

proptest! {
    #[test]
    fn roundtrip_i8(v in any::<i8>()) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Int(v as i64), &TypeDesc::I8);
        prop_assert_eq!(back, HostValue::Int(v as i64));
    }

    #[test]
    fn roundtrip_u16(v in any::<u16>()) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Int(v as i64), &TypeDesc::U16);
        prop_assert_eq!(back, HostValue::Int(v as i64));
    }

    #[test]
    fn roundtrip_i32(v in any::<i32>()) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Int(v as i64), &TypeDesc::I32);
        prop_assert_eq!(back, HostValue::Int(v as i64));
    }

    #[test]
    fn roundtrip_u64(v in any::<u64>()) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Int(v as i64), &TypeDesc::U64);
        // The slot stores the full width; the host view is a signed 64-bit
        // reinterpretation.
        prop_assert_eq!(back, HostValue::Int(v as i64));
    }

    #[test]
    fn roundtrip_f32(v in -1.0e30f32..1.0e30f32) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Float(v as f64), &TypeDesc::F32);
        prop_assert_eq!(back, HostValue::Float(v as f64));
    }

    #[test]
    fn roundtrip_f64(v in -1.0e300f64..1.0e300f64) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Float(v), &TypeDesc::F64);
        prop_assert_eq!(back, HostValue::Float(v));
    }

    #[test]
    fn roundtrip_bool(v in any::<bool>()) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Bool(v), &TypeDesc::Bool);
        prop_assert_eq!(back, HostValue::Bool(v));
    }

    #[test]
    fn roundtrip_codepoint(v in proptest::char::any()) {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Str(v.to_string()), &TypeDesc::Char);
        prop_assert_eq!(back, HostValue::Str(v.to_string()));
    }

    #[test]
    fn roundtrip_utf8(s in "[a-zA-Z0-9 àß€]{0,24}") {
        let bridge = bridge_with(Catalog::new());
        let back = roundtrip(&bridge, HostValue::Str(s.clone()), &TypeDesc::Utf8);
        prop_assert_eq!(back, HostValue::Str(s));
    }

    #[test]
    fn roundtrip_zero_terminated_array(values in proptest::collection::vec(1i32..=i32::MAX, 0..12)) {
        let bridge = bridge_with(Catalog::new());
        let ty = TypeDesc::Array(ArrayDesc::new(TypeDesc::I32, ArrayLength::ZeroTerminated));
        let list = HostValue::List(values.iter().map(|v| HostValue::Int(*v as i64)).collect());
        let back = roundtrip(&bridge, list.clone(), &ty);
        prop_assert_eq!(back, list);
    }
}

#[test]
fn filename_text_lifts_lossily_where_owned_text_rejects() {
    let bridge = bridge_with(Catalog::new());

    let make_invalid = || {
        let buf = nid_bridge::native::alloc_zeroed(3) as *mut u8;
        unsafe {
            *buf = b'f';
            *buf.add(1) = 0xFF;
        }
        NativeSlot::from_ptr(buf as *mut _)
    };

    let lifted = native_to_value(&bridge, &make_invalid(), &TypeDesc::Filename, Transfer::Full)
        .unwrap()
        .unwrap();
    assert_eq!(lifted, HostValue::Str("f\u{FFFD}".into()));

    let err = native_to_value(&bridge, &make_invalid(), &TypeDesc::Utf8, Transfer::None).unwrap_err();
    assert!(matches!(err, MarshalError::InvalidUtf8));
}

#[test]
fn roundtrip_list_and_map_chains() {
    let bridge = bridge_with(Catalog::new());

    let list_ty = TypeDesc::List(Box::new(TypeDesc::I64));
    let list = HostValue::List(vec![1.into(), (-2i64).into(), 3.into()]);
    // Full transfer both ways so the chain is freed by the lift.
    let slot = value_to_native(&bridge, &list, &list_ty, Transfer::Full, false).unwrap();
    let back = native_to_value(&bridge, &slot, &list_ty, Transfer::Full)
        .unwrap()
        .unwrap();
    assert_eq!(back, list);

    let map_ty = TypeDesc::Map(Box::new(TypeDesc::Utf8), Box::new(TypeDesc::I64));
    let map = HostValue::Map(vec![
        ("one".into(), HostValue::Int(1)),
        ("two".into(), HostValue::Int(2)),
    ]);
    let slot = value_to_native(&bridge, &map, &map_ty, Transfer::Full, false).unwrap();
    let back = native_to_value(&bridge, &slot, &map_ty, Transfer::Full)
        .unwrap()
        .unwrap();
    assert_eq!(back, map);
}

#[test]
fn roundtrip_flags_decompose_symbolically() {
    let mut catalog = Catalog::new();
    let flags = catalog.add_enum(
        "io-flags",
        TypeDesc::U32,
        &[("read", 1), ("write", 2), ("append", 4)],
        true,
    );
    let bridge = bridge_with(catalog);
    let ty = TypeDesc::Flags(flags);

    let value = HostValue::List(vec![HostValue::from("read"), HostValue::from("append")]);
    let slot = value_to_native(&bridge, &value, &ty, Transfer::None, false).unwrap();
    assert_eq!(unsafe { slot.v_i64 }, 5);

    let back = native_to_value(&bridge, &slot, &ty, Transfer::None)
        .unwrap()
        .unwrap();
    assert_eq!(back, value);
}

#[test]
fn opaque_value_container_carries_scalars() {
    let mut catalog = Catalog::new();
    let boxed = catalog.add_well_known("value-box", WellKnown::OpaqueValue, None);
    let bridge = bridge_with(catalog);
    let ty = TypeDesc::Record(boxed);

    for value in [
        HostValue::Int(-3),
        HostValue::Float(2.5),
        HostValue::Bool(true),
        HostValue::Str("boxed".into()),
    ] {
        let slot = value_to_native(&bridge, &value, &ty, Transfer::Full, false).unwrap();
        let back = native_to_value(&bridge, &slot, &ty, Transfer::Full)
            .unwrap()
            .unwrap();
        assert_eq!(back, value);
    }
}
