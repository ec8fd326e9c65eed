//! Record field access and virtual-method override installation.

mod common;

use std::ffi::c_void;
use std::sync::Arc;

use common::*;
use nid_bridge::fields::{get_field, set_field};
use nid_bridge::native;
use nid_bridge::prelude::*;
use nid_bridge::{closure, install_overrides};

#[test]
fn fields_read_and_write_through_the_marshaler() {
    let mut catalog = Catalog::new();
    let point = add_point_record(&mut catalog);
    let bridge = bridge_with(catalog);

    let mem = native::alloc_zeroed(std::mem::size_of::<Point>());
    unsafe {
        set_field(&bridge, point, "x", mem, &HostValue::Int(31)).unwrap();
        set_field(&bridge, point, "y", mem, &HostValue::from("11")).unwrap();

        let p = mem as *const Point;
        assert_eq!(((*p).x, (*p).y), (31, 11));

        assert_eq!(
            get_field(&bridge, point, "x", mem, Transfer::None).unwrap(),
            HostValue::Int(31)
        );
        let err = get_field(&bridge, point, "z", mem, Transfer::None).unwrap_err();
        assert!(matches!(
            err,
            nid_bridge::Error::Marshal(MarshalError::UnknownField { .. })
        ));
        native::release(mem);
    }
}

#[test]
fn embedded_record_fields_are_accessed_in_place() {
    let mut catalog = Catalog::new();
    let point = add_point_record(&mut catalog);
    let segment = catalog.add_record(
        "segment",
        &[
            ("from", TypeDesc::Record(point)),
            ("to", TypeDesc::Record(point)),
        ],
    );
    let bridge = bridge_with(catalog);

    let mem = native::alloc_zeroed(2 * std::mem::size_of::<Point>());
    unsafe {
        let to = HostValue::Map(vec![
            ("x".into(), HostValue::Int(8)),
            ("y".into(), HostValue::Int(15)),
        ]);
        set_field(&bridge, segment, "to", mem, &to).unwrap();

        // The embedded struct was written at its field offset.
        let raw = mem as *const Point;
        assert_eq!(((*raw.add(1)).x, (*raw.add(1)).y), (8, 15));

        assert_eq!(
            get_field(&bridge, segment, "to", mem, Transfer::None).unwrap(),
            to
        );
        native::release(mem);
    }
}

/// A runtime with just enough named-method dispatch for override tests.
struct MethodRuntime;

impl HostRuntime for MethodRuntime {
    fn call(
        &self,
        callable: &Arc<HostFn>,
        args: &[HostValue],
        _expected: usize,
    ) -> anyhow::Result<Vec<HostValue>> {
        callable(args)
    }

    fn call_method(
        &self,
        name: &str,
        args: &[HostValue],
        _expected: usize,
    ) -> anyhow::Result<Vec<HostValue>> {
        match name {
            "COMPUTE" => Ok(vec![HostValue::Int(args[0].as_i64() * 3)]),
            other => anyhow::bail!("no such method: {other}"),
        }
    }
}

#[test]
fn overrides_install_trampolines_into_class_struct_slots() {
    let _guard = closure_lock();
    let mut catalog = Catalog::new();
    let compute_sig = catalog.add_callable(
        CallableDesc::new("compute", CallableKind::Callback)
            .arg(ArgDesc::new("x", TypeDesc::I32))
            .returns(TypeDesc::I32, Transfer::None),
    );
    let class_struct = catalog.add_record(
        "widget-class",
        &[
            ("parent", TypeDesc::U64),
            ("compute", TypeDesc::Callback(compute_sig)),
        ],
    );
    let bridge = Bridge::new(Arc::new(catalog), Arc::new(MethodRuntime));
    let baseline = closure::live_count();

    #[repr(C)]
    struct WidgetClass {
        parent: u64,
        compute: Option<unsafe extern "C" fn(i32) -> i32>,
    }
    let mut class = WidgetClass {
        parent: 0,
        compute: None,
    };

    let installed = unsafe {
        install_overrides(
            &bridge,
            class_struct,
            &mut class as *mut WidgetClass as *mut c_void,
            &[("compute", "COMPUTE")],
        )
        .unwrap()
    };
    assert_eq!(installed, 1);
    assert_eq!(closure::live_count(), baseline + 1);

    // Native dispatch through the installed slot reaches the host method.
    let f = class.compute.unwrap();
    assert_eq!(unsafe { f(14) }, 42);
}
