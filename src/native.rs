//! Native-side memory model.
//!
//! Everything that crosses the boundary with native ownership is allocated
//! through `malloc`/`free` so either side can release it. This module also
//! defines the C layouts the engine uses where the native platform library
//! would normally provide them: linked-list and map node chains, the tagged
//! opaque value container, and the error record for throwing callables.

use std::ffi::{CStr, c_char, c_void};

use crate::marshal::NativeSlot;

/// Allocate a zeroed native buffer. The result is owned by whoever the
/// transfer annotation says owns it; release with [`release`] or `free`.
pub fn alloc_zeroed(size: usize) -> *mut c_void {
    // calloc so freshly allocated out-structs and array tails read as zero
    unsafe { libc::calloc(1, size.max(1)) }
}

/// Release a native buffer obtained from this module.
///
/// # Safety
/// `ptr` must be null or an unreleased pointer from this allocator family.
pub unsafe fn release(ptr: *mut c_void) {
    if !ptr.is_null() {
        unsafe { libc::free(ptr) }
    }
}

/// Duplicate a string into a fresh NUL-terminated native buffer.
pub fn strdup(s: &str) -> *mut c_char {
    let buf = alloc_zeroed(s.len() + 1) as *mut c_char;
    if !buf.is_null() {
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr() as *const c_char, buf, s.len());
        }
    }
    buf
}

/// Read a NUL-terminated native string as UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated buffer.
pub unsafe fn string_utf8(ptr: *const c_char) -> Option<Result<String, std::str::Utf8Error>> {
    if ptr.is_null() {
        return None;
    }
    let bytes = unsafe { CStr::from_ptr(ptr) };
    Some(bytes.to_str().map(str::to_owned))
}

/// Read a NUL-terminated native string, replacing invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated buffer.
pub unsafe fn string_lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let bytes = unsafe { CStr::from_ptr(ptr) };
    Some(bytes.to_string_lossy().into_owned())
}

/// One node of a singly-linked native list. Element payloads are stored
/// pointer-width: pointers directly, integers inline-cast.
#[repr(C)]
#[derive(Debug)]
pub struct ListNode {
    pub data: *mut c_void,
    pub next: *mut ListNode,
}

/// One node of a keyed native chain, the engine's associative container.
#[repr(C)]
#[derive(Debug)]
pub struct MapNode {
    pub key: *mut c_void,
    pub value: *mut c_void,
    pub next: *mut MapNode,
}

/// Number of nodes in a list chain.
///
/// # Safety
/// `head` must be null or the head of a well-formed chain.
pub unsafe fn list_len(head: *const ListNode) -> usize {
    let mut n = 0;
    let mut cur = head;
    while !cur.is_null() {
        n += 1;
        cur = unsafe { (*cur).next };
    }
    n
}

/// Free the nodes of a list chain, leaving payloads alone.
///
/// # Safety
/// `head` must be null or an owned, well-formed chain.
pub unsafe fn free_list_nodes(head: *mut ListNode) {
    let mut cur = head;
    while !cur.is_null() {
        let next = unsafe { (*cur).next };
        unsafe { release(cur as *mut c_void) };
        cur = next;
    }
}

/// Free the nodes of a map chain, leaving keys and payloads alone.
///
/// # Safety
/// `head` must be null or an owned, well-formed chain.
pub unsafe fn free_map_nodes(head: *mut MapNode) {
    let mut cur = head;
    while !cur.is_null() {
        let next = unsafe { (*cur).next };
        unsafe { release(cur as *mut c_void) };
        cur = next;
    }
}

/// Tag of a [`ValueBox`] payload.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BoxTag {
    Undef = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    /// Owned NUL-terminated string in the slot's pointer.
    Str = 4,
    /// Opaque pointer payload.
    Ptr = 5,
}

/// The engine's generic opaque value container: a tag plus one slot.
/// Registered well-known records with the opaque-value shape marshal
/// through this layout.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct ValueBox {
    pub tag: u32,
    pub slot: NativeSlot,
}

/// Size of the opaque value container layout.
pub const VALUE_BOX_SIZE: usize = std::mem::size_of::<ValueBox>();

/// Native error record for callables that report failure through a trailing
/// error out-slot.
#[repr(C)]
#[derive(Debug)]
pub struct RaisedError {
    pub code: i32,
    pub message: *mut c_char,
}

impl RaisedError {
    /// Allocate a new error record; native implementations store the result
    /// through their error out-parameter.
    pub fn raise(code: i32, message: &str) -> *mut RaisedError {
        let err = alloc_zeroed(std::mem::size_of::<RaisedError>()) as *mut RaisedError;
        if !err.is_null() {
            unsafe {
                (*err).code = code;
                (*err).message = strdup(message);
            }
        }
        err
    }

    /// Consume an error record, returning its code and message.
    ///
    /// # Safety
    /// `ptr` must be an owned record from [`RaisedError::raise`].
    pub unsafe fn take(ptr: *mut RaisedError) -> (i32, String) {
        let code = unsafe { (*ptr).code };
        let message = unsafe { string_lossy((*ptr).message) }.unwrap_or_default();
        unsafe {
            release((*ptr).message as *mut c_void);
            release(ptr as *mut c_void);
        }
        (code, message)
    }
}
