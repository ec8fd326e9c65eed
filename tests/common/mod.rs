//! Common test utilities and fixtures.
//!
//! Native test functions (real `extern "C"` entry points the bridge calls
//! through libffi), plus shared catalog and bridge builders.

// Each test binary uses its own slice of these fixtures.
#![allow(dead_code)]

use std::ffi::{CStr, c_char, c_void};
use std::sync::{Arc, Mutex, OnceLock};

use nid_bridge::native::{self, ListNode, RaisedError};
use nid_bridge::prelude::*;

// =============================================================================
// Bridge construction
// =============================================================================

pub fn bridge_with(catalog: Catalog) -> Bridge {
    Bridge::new(Arc::new(catalog), Arc::new(BasicRuntime::new()))
}

/// Tests asserting on the process-wide trampoline live count take this
/// lock so concurrent tests cannot shift the count under them.
pub fn closure_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Scalar and out-parameter natives
// =============================================================================

pub unsafe extern "C" fn double_into(a: i32, b: *mut i32) {
    unsafe { *b = a * 2 };
}

pub unsafe extern "C" fn negate_inout(p: *mut i32) {
    unsafe { *p = -*p };
}

pub unsafe extern "C" fn add_between(a: i32, b: *mut i32, c: i32) {
    unsafe { *b = a + c };
}

pub unsafe extern "C" fn string_len(s: *const c_char) -> i32 {
    if s.is_null() {
        return -1;
    }
    unsafe { CStr::from_ptr(s) }.to_bytes().len() as i32
}

pub unsafe extern "C" fn concat_strings(a: *const c_char, b: *const c_char) -> *mut c_char {
    let a = unsafe { CStr::from_ptr(a) }.to_string_lossy();
    let b = unsafe { CStr::from_ptr(b) }.to_string_lossy();
    native::strdup(&format!("{a}{b}"))
}

// =============================================================================
// Array natives
// =============================================================================

pub unsafe extern "C" fn sum_zero_terminated(arr: *const i32) -> i32 {
    let mut total = 0;
    let mut cur = arr;
    unsafe {
        while *cur != 0 {
            total += *cur;
            cur = cur.add(1);
        }
    }
    total
}

pub unsafe extern "C" fn sum_counted(arr: *const i32, n: u64) -> i64 {
    let mut total = 0i64;
    for i in 0..n as usize {
        total += unsafe { *arr.add(i) } as i64;
    }
    total
}

pub unsafe extern "C" fn list_sum(head: *const ListNode) -> i64 {
    let mut total = 0i64;
    let mut cur = head;
    while !cur.is_null() {
        total += unsafe { (*cur).data } as usize as i64;
        cur = unsafe { (*cur).next };
    }
    total
}

// =============================================================================
// Record natives
// =============================================================================

#[repr(C)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

pub unsafe extern "C" fn make_point(x: i32, y: i32) -> *mut Point {
    let p = native::alloc_zeroed(std::mem::size_of::<Point>()) as *mut Point;
    unsafe {
        (*p).x = x;
        (*p).y = y;
    }
    p
}

pub unsafe extern "C" fn point_norm2(p: *const Point) -> i64 {
    let (x, y) = unsafe { ((*p).x as i64, (*p).y as i64) };
    x * x + y * y
}

pub unsafe extern "C" fn out_point(p: *mut Point) {
    unsafe {
        (*p).x = 7;
        (*p).y = 9;
    }
}

// =============================================================================
// Refcounted object natives
// =============================================================================

#[repr(C)]
pub struct Counter {
    pub refs: i32,
    pub value: i64,
}

pub unsafe extern "C" fn counter_new() -> *mut Counter {
    let c = native::alloc_zeroed(std::mem::size_of::<Counter>()) as *mut Counter;
    unsafe { (*c).refs = 1 };
    c
}

pub unsafe extern "C" fn counter_ref(p: *mut c_void) -> *mut c_void {
    unsafe { (*(p as *mut Counter)).refs += 1 };
    p
}

pub unsafe extern "C" fn counter_unref(p: *mut c_void) {
    unsafe {
        let c = p as *mut Counter;
        (*c).refs -= 1;
        if (*c).refs == 0 {
            native::release(p);
        }
    }
}

pub unsafe extern "C" fn counter_refs(p: *mut c_void) -> usize {
    unsafe { (*(p as *mut Counter)).refs as usize }
}

pub unsafe extern "C" fn counter_add(p: *mut Counter, delta: i64) -> i64 {
    unsafe {
        (*p).value += delta;
        (*p).value
    }
}

// =============================================================================
// Throwing native
// =============================================================================

pub unsafe extern "C" fn checked_divide(a: i32, b: i32, err: *mut *mut RaisedError) -> i32 {
    if b == 0 {
        unsafe { *err = RaisedError::raise(11, "division by zero") };
        return 0;
    }
    a / b
}

// =============================================================================
// Callback natives
// =============================================================================

pub type NativeCb = unsafe extern "C" fn(i32, *mut c_void) -> i32;

pub unsafe extern "C" fn apply_twice(
    cb: Option<NativeCb>,
    data: *mut c_void,
    x: i32,
) -> i32 {
    match cb {
        Some(cb) => unsafe { cb(x, data) + cb(x, data) },
        None => 0,
    }
}

/// Storage for the notified-scope scenario: a native side that keeps the
/// callback alive past the registering call.
fn stored() -> &'static Mutex<(usize, usize, usize)> {
    static STORED: OnceLock<Mutex<(usize, usize, usize)>> = OnceLock::new();
    STORED.get_or_init(|| Mutex::new((0, 0, 0)))
}

pub unsafe extern "C" fn store_callback(cb: *mut c_void, data: *mut c_void, notify: *mut c_void) {
    *stored().lock().unwrap() = (cb as usize, data as usize, notify as usize);
}

pub fn stored_parts() -> (usize, usize, usize) {
    *stored().lock().unwrap()
}

pub unsafe extern "C" fn invoke_stored(x: i32) -> i32 {
    let (cb, data, _) = stored_parts();
    if cb == 0 {
        return -1;
    }
    let cb: NativeCb = unsafe { std::mem::transmute(cb) };
    unsafe { cb(x, data as *mut c_void) }
}

pub unsafe extern "C" fn release_stored() {
    let (_, data, notify) = {
        let mut guard = stored().lock().unwrap();
        let parts = *guard;
        *guard = (0, 0, 0);
        (parts.0, parts.1, parts.2)
    };
    if notify != 0 {
        let notify: unsafe extern "C" fn(*mut c_void) = unsafe { std::mem::transmute(notify) };
        unsafe { notify(data as *mut c_void) };
    }
}

// =============================================================================
// Descriptor fixtures
// =============================================================================

/// The callback signature every callback fixture shares:
/// `(in i32 x, user-data) -> i32`.
pub fn add_callback_signature(catalog: &mut Catalog) -> CallableId {
    catalog.add_callable(
        CallableDesc::new("int_step", CallableKind::Callback)
            .arg(ArgDesc::new("x", TypeDesc::I32))
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .returns(TypeDesc::I32, Transfer::None),
    )
}

/// The destroy-notify signature: `(user-data) -> void`.
pub fn add_notify_signature(catalog: &mut Catalog) -> CallableId {
    catalog.add_callable(
        CallableDesc::new("destroy_notify", CallableKind::Callback)
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(0)),
    )
}

pub fn add_point_record(catalog: &mut Catalog) -> RecordId {
    catalog.add_record("point", &[("x", TypeDesc::I32), ("y", TypeDesc::I32)])
}
