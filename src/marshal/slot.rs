//! The native argument slot and raw-memory accessors.
//!
//! [`NativeSlot`] is the union every argument and return value passes
//! through: wide enough for any scalar, a size, or a pointer. Slots are
//! always created zeroed, then one field is written; reading a field is
//! `unsafe` at the call site, the same discipline a C argument union gets.

use std::ffi::c_void;

use libffi::middle::Type;

use crate::descriptor::{Catalog, TypeDesc};

/// One native argument or return slot.
#[repr(C)]
#[derive(Copy, Clone)]
pub union NativeSlot {
    pub v_i8: i8,
    pub v_u8: u8,
    pub v_i16: i16,
    pub v_u16: u16,
    pub v_i32: i32,
    pub v_u32: u32,
    pub v_i64: i64,
    pub v_u64: u64,
    pub v_f32: f32,
    pub v_f64: f64,
    pub v_size: usize,
    pub v_ptr: *mut c_void,
}

impl NativeSlot {
    /// A fully zeroed slot; the only valid starting point.
    pub fn zeroed() -> Self {
        // All fields admit the all-zero bit pattern.
        unsafe { std::mem::zeroed() }
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        let mut slot = Self::zeroed();
        slot.v_ptr = ptr;
        slot
    }

    /// Read the pointer field. Safe: every field of the union admits any
    /// bit pattern, and slots are always constructed zeroed.
    pub fn ptr(&self) -> *mut c_void {
        unsafe { self.v_ptr }
    }
}

impl Default for NativeSlot {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl std::fmt::Debug for NativeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeSlot({:#018x})", unsafe { self.v_u64 })
    }
}

/// Read a native value of the given shape from raw memory into a slot.
///
/// Compound shapes and strings read one pointer; enums read at their
/// declared storage width and are widened to the slot's i64 field.
///
/// # Safety
/// `ptr` must point to readable memory of at least the shape's native size.
pub(crate) unsafe fn read_raw(ptr: *const c_void, ty: &TypeDesc, catalog: &Catalog) -> NativeSlot {
    let mut slot = NativeSlot::zeroed();
    unsafe {
        match ty {
            TypeDesc::Void => slot.v_ptr = *(ptr as *const *mut c_void),
            TypeDesc::Bool => slot.v_i32 = *(ptr as *const i32),
            TypeDesc::I8 => slot.v_i8 = *(ptr as *const i8),
            TypeDesc::U8 => slot.v_u8 = *(ptr as *const u8),
            TypeDesc::I16 => slot.v_i16 = *(ptr as *const i16),
            TypeDesc::U16 => slot.v_u16 = *(ptr as *const u16),
            TypeDesc::I32 => slot.v_i32 = *(ptr as *const i32),
            TypeDesc::U32 => slot.v_u32 = *(ptr as *const u32),
            TypeDesc::I64 => slot.v_i64 = *(ptr as *const i64),
            TypeDesc::U64 => slot.v_u64 = *(ptr as *const u64),
            TypeDesc::F32 => slot.v_f32 = *(ptr as *const f32),
            TypeDesc::F64 => slot.v_f64 = *(ptr as *const f64),
            TypeDesc::Char => slot.v_u32 = *(ptr as *const u32),
            TypeDesc::Enum(id) | TypeDesc::Flags(id) => {
                let storage = catalog
                    .enum_(*id)
                    .map(|e| e.storage.clone())
                    .unwrap_or(TypeDesc::I32);
                slot.v_i64 = read_int_widened(ptr, &storage);
            }
            TypeDesc::Utf8
            | TypeDesc::Filename
            | TypeDesc::Array(_)
            | TypeDesc::List(_)
            | TypeDesc::Map(_, _)
            | TypeDesc::Record(_)
            | TypeDesc::Object(_)
            | TypeDesc::Callback(_)
            | TypeDesc::ErrorValue => slot.v_ptr = *(ptr as *const *mut c_void),
        }
    }
    slot
}

unsafe fn read_int_widened(ptr: *const c_void, storage: &TypeDesc) -> i64 {
    unsafe {
        match storage {
            TypeDesc::I8 => *(ptr as *const i8) as i64,
            TypeDesc::U8 => *(ptr as *const u8) as i64,
            TypeDesc::I16 => *(ptr as *const i16) as i64,
            TypeDesc::U16 => *(ptr as *const u16) as i64,
            TypeDesc::U32 => *(ptr as *const u32) as i64,
            TypeDesc::I64 | TypeDesc::U64 => *(ptr as *const i64),
            _ => *(ptr as *const i32) as i64,
        }
    }
}

/// Write a slot's value of the given shape into raw memory.
///
/// # Safety
/// `ptr` must point to writable memory of at least the shape's native size.
pub(crate) unsafe fn write_raw(
    slot: NativeSlot,
    ptr: *mut c_void,
    ty: &TypeDesc,
    catalog: &Catalog,
) {
    unsafe {
        match ty {
            TypeDesc::Void => *(ptr as *mut *mut c_void) = slot.v_ptr,
            TypeDesc::Bool => *(ptr as *mut i32) = slot.v_i32,
            TypeDesc::I8 => *(ptr as *mut i8) = slot.v_i8,
            TypeDesc::U8 => *(ptr as *mut u8) = slot.v_u8,
            TypeDesc::I16 => *(ptr as *mut i16) = slot.v_i16,
            TypeDesc::U16 => *(ptr as *mut u16) = slot.v_u16,
            TypeDesc::I32 => *(ptr as *mut i32) = slot.v_i32,
            TypeDesc::U32 => *(ptr as *mut u32) = slot.v_u32,
            TypeDesc::I64 => *(ptr as *mut i64) = slot.v_i64,
            TypeDesc::U64 => *(ptr as *mut u64) = slot.v_u64,
            TypeDesc::F32 => *(ptr as *mut f32) = slot.v_f32,
            TypeDesc::F64 => *(ptr as *mut f64) = slot.v_f64,
            TypeDesc::Char => *(ptr as *mut u32) = slot.v_u32,
            TypeDesc::Enum(id) | TypeDesc::Flags(id) => {
                let storage = catalog
                    .enum_(*id)
                    .map(|e| e.storage.clone())
                    .unwrap_or(TypeDesc::I32);
                write_int_narrowed(slot.v_i64, ptr, &storage);
            }
            TypeDesc::Utf8
            | TypeDesc::Filename
            | TypeDesc::Array(_)
            | TypeDesc::List(_)
            | TypeDesc::Map(_, _)
            | TypeDesc::Record(_)
            | TypeDesc::Object(_)
            | TypeDesc::Callback(_)
            | TypeDesc::ErrorValue => *(ptr as *mut *mut c_void) = slot.v_ptr,
        }
    }
}

unsafe fn write_int_narrowed(value: i64, ptr: *mut c_void, storage: &TypeDesc) {
    unsafe {
        match storage {
            TypeDesc::I8 | TypeDesc::U8 => *(ptr as *mut u8) = value as u8,
            TypeDesc::I16 | TypeDesc::U16 => *(ptr as *mut u16) = value as u16,
            TypeDesc::I64 | TypeDesc::U64 => *(ptr as *mut i64) = value,
            _ => *(ptr as *mut u32) = value as u32,
        }
    }
}

/// Write a reverse-invocation return value into the libffi return buffer.
/// Integral values narrower than a register are widened, as the closure ABI
/// requires; floats and pointers are written exactly.
///
/// # Safety
/// `dest` must be the return buffer libffi handed to the closure entry.
pub(crate) unsafe fn write_return(
    slot: NativeSlot,
    ty: &TypeDesc,
    catalog: &Catalog,
    dest: *mut NativeSlot,
) {
    unsafe {
        let out = &mut *dest;
        *out = NativeSlot::zeroed();
        match ty {
            TypeDesc::Void => {}
            TypeDesc::Bool => out.v_i64 = slot.v_i32 as i64,
            TypeDesc::I8 => out.v_i64 = slot.v_i8 as i64,
            TypeDesc::U8 => out.v_u64 = slot.v_u8 as u64,
            TypeDesc::I16 => out.v_i64 = slot.v_i16 as i64,
            TypeDesc::U16 => out.v_u64 = slot.v_u16 as u64,
            TypeDesc::I32 => out.v_i64 = slot.v_i32 as i64,
            TypeDesc::U32 => out.v_u64 = slot.v_u32 as u64,
            TypeDesc::I64 => out.v_i64 = slot.v_i64,
            TypeDesc::U64 => out.v_u64 = slot.v_u64,
            TypeDesc::F32 => out.v_f32 = slot.v_f32,
            TypeDesc::F64 => out.v_f64 = slot.v_f64,
            TypeDesc::Char => out.v_u64 = slot.v_u32 as u64,
            TypeDesc::Enum(id) | TypeDesc::Flags(id) => {
                let signed = matches!(
                    catalog.enum_(*id).map(|e| e.storage.clone()),
                    Some(TypeDesc::I8 | TypeDesc::I16 | TypeDesc::I32 | TypeDesc::I64) | None
                );
                if signed {
                    out.v_i64 = slot.v_i64;
                } else {
                    out.v_u64 = slot.v_i64 as u64;
                }
            }
            _ => out.v_ptr = slot.v_ptr,
        }
    }
}

/// Map a type shape to its libffi argument type. `Void` in argument
/// position is the opaque user-data pointer. Returns `None` when an enum id
/// does not resolve.
pub(crate) fn ffi_type_of(ty: &TypeDesc, catalog: &Catalog) -> Option<Type> {
    Some(match ty {
        TypeDesc::Void => Type::pointer(),
        TypeDesc::Bool => Type::i32(),
        TypeDesc::I8 => Type::i8(),
        TypeDesc::U8 => Type::u8(),
        TypeDesc::I16 => Type::i16(),
        TypeDesc::U16 => Type::u16(),
        TypeDesc::I32 => Type::i32(),
        TypeDesc::U32 => Type::u32(),
        TypeDesc::I64 => Type::i64(),
        TypeDesc::U64 => Type::u64(),
        TypeDesc::F32 => Type::f32(),
        TypeDesc::F64 => Type::f64(),
        TypeDesc::Char => Type::u32(),
        TypeDesc::Enum(id) | TypeDesc::Flags(id) => {
            let desc = catalog.enum_(*id)?;
            ffi_type_of(&desc.storage, catalog)?
        }
        TypeDesc::Utf8
        | TypeDesc::Filename
        | TypeDesc::Array(_)
        | TypeDesc::List(_)
        | TypeDesc::Map(_, _)
        | TypeDesc::Record(_)
        | TypeDesc::Object(_)
        | TypeDesc::Callback(_)
        | TypeDesc::ErrorValue => Type::pointer(),
    })
}

/// Map a return shape to its libffi return type.
pub(crate) fn ffi_return_type(ty: &TypeDesc, catalog: &Catalog) -> Option<Type> {
    if ty.is_void() {
        Some(Type::void())
    } else {
        ffi_type_of(ty, catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_roundtrip_scalars() {
        let catalog = Catalog::new();
        let mut buf = [0u8; 8];
        let mut slot = NativeSlot::zeroed();
        slot.v_i16 = -1234;
        unsafe {
            write_raw(slot, buf.as_mut_ptr() as *mut _, &TypeDesc::I16, &catalog);
            let back = read_raw(buf.as_ptr() as *const _, &TypeDesc::I16, &catalog);
            assert_eq!(back.v_i16, -1234);
        }
    }

    #[test]
    fn enum_storage_widening() {
        let mut catalog = Catalog::new();
        let id = catalog.add_enum("e", TypeDesc::U8, &[("a", 200)], false);
        let mut buf = [0u8; 8];
        let mut slot = NativeSlot::zeroed();
        slot.v_i64 = 200;
        unsafe {
            write_raw(slot, buf.as_mut_ptr() as *mut _, &TypeDesc::Enum(id), &catalog);
            assert_eq!(buf[0], 200);
            assert_eq!(buf[1], 0);
            let back = read_raw(buf.as_ptr() as *const _, &TypeDesc::Enum(id), &catalog);
            assert_eq!(back.v_i64, 200);
        }
    }
}
