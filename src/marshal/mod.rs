//! Bidirectional value marshaling.
//!
//! One native slot and one host value convert into each other given a type
//! shape and a transfer annotation. The dispatch is a single match over the
//! type sum: scalars convert inline, strings duplicate across the boundary,
//! aggregates and interface shapes recurse into their own modules.
//!
//! Ownership discipline: the marshaler never frees a no-transfer value and
//! never leaves a full-transfer value unfreed on the side losing ownership.
//! Buffers created here *for* a borrowed crossing are handed to the
//! invocation frame's temp list instead.

mod array;
mod containers;
mod error;
mod interface;
mod slot;

pub use error::MarshalError;
pub use slot::NativeSlot;

pub(crate) use interface::{host_record_fill, receiver_pointer};
pub(crate) use slot::{ffi_return_type, ffi_type_of, read_raw, write_raw, write_return};

use std::ffi::{c_char, c_void};

use crate::descriptor::{ArgDesc, Transfer, TypeDesc};
use crate::invoke::{Bridge, InvocationRegs};
use crate::logging::trace;
use crate::native;
use crate::value::HostValue;

/// Convert one host value to a native slot outside any invocation frame.
///
/// Buffers created for borrowed (no-transfer) values become the caller's
/// responsibility; inside a call, the frame tracks them instead.
pub fn value_to_native(
    bridge: &Bridge,
    value: &HostValue,
    ty: &TypeDesc,
    transfer: Transfer,
    nullable: bool,
) -> Result<NativeSlot, MarshalError> {
    host_to_native(bridge, value, None, ty, transfer, nullable, None)
}

/// Convert one native slot to a host value outside any invocation frame.
///
/// Returns `Ok(None)` for slots with no host-side representation.
pub fn native_to_value(
    bridge: &Bridge,
    slot: &NativeSlot,
    ty: &TypeDesc,
    transfer: Transfer,
) -> Result<Option<HostValue>, MarshalError> {
    native_to_host(bridge, slot, ty, transfer, None)
}

/// Marshal one host value into a native slot.
///
/// `arg` supplies the argument's name and callback companion positions when
/// marshaling an actual argument; element and field marshaling passes
/// `None`, as does `regs` when no invocation frame is in scope. Without a
/// frame, buffers created for borrowed values become the caller's
/// responsibility.
pub(crate) fn host_to_native(
    bridge: &Bridge,
    value: &HostValue,
    arg: Option<&ArgDesc>,
    ty: &TypeDesc,
    transfer: Transfer,
    nullable: bool,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<NativeSlot, MarshalError> {
    // Interface, callback, and void shapes handle absent values themselves.
    if !value.is_defined()
        && !nullable
        && !matches!(
            ty,
            TypeDesc::Void
                | TypeDesc::Record(_)
                | TypeDesc::Enum(_)
                | TypeDesc::Flags(_)
                | TypeDesc::Object(_)
                | TypeDesc::Callback(_)
        )
    {
        return Err(MarshalError::MissingValue {
            name: arg.map(|a| a.name.clone()).unwrap_or_else(|| "value".into()),
        });
    }

    let mut out = NativeSlot::zeroed();
    match ty {
        TypeDesc::Void => {
            // Untyped slots are callback user data: correlate with a pending
            // registration, or pass null when none claims this position.
            if let Some(regs) = regs.as_deref_mut() {
                if let Some(pos) = regs.current_pos {
                    if let Some(tramp) = regs.pending_data(pos) {
                        trace!(pos, key = tramp.key(), "attaching callback user data");
                        tramp.attach_user_data(value.clone());
                        out.v_ptr = tramp.key() as usize as *mut c_void;
                    }
                }
            }
        }
        TypeDesc::Bool => out.v_i32 = value.truthy() as i32,
        TypeDesc::I8 => out.v_i8 = value.as_i64() as i8,
        TypeDesc::U8 => out.v_u8 = value.as_u64() as u8,
        TypeDesc::I16 => out.v_i16 = value.as_i64() as i16,
        TypeDesc::U16 => out.v_u16 = value.as_u64() as u16,
        TypeDesc::I32 => out.v_i32 = value.as_i64() as i32,
        TypeDesc::U32 => out.v_u32 = value.as_u64() as u32,
        TypeDesc::I64 => out.v_i64 = value.as_i64(),
        TypeDesc::U64 => out.v_u64 = value.as_u64(),
        TypeDesc::F32 => out.v_f32 = value.as_f64() as f32,
        TypeDesc::F64 => out.v_f64 = value.as_f64(),
        TypeDesc::Char => out.v_u32 = value.as_codepoint(),
        TypeDesc::Utf8 | TypeDesc::Filename => {
            if let Some(text) = value.to_text() {
                let buf = native::strdup(&text);
                if transfer < Transfer::Container {
                    // The callee only borrows; the frame owns the copy.
                    if let Some(regs) = regs.as_deref_mut() {
                        regs.track_temp(buf as *mut c_void);
                    }
                }
                out.v_ptr = buf as *mut c_void;
            }
        }
        TypeDesc::Array(desc) => {
            out = array::host_to_array(bridge, value, desc, transfer, regs)?;
        }
        TypeDesc::List(elem) => {
            out = containers::host_to_list(bridge, value, elem, transfer, regs)?;
        }
        TypeDesc::Map(key, val) => {
            out = containers::host_to_map(bridge, value, key, val, transfer, regs)?;
        }
        TypeDesc::Record(id) => {
            out = interface::host_to_record(bridge, value, *id, transfer, nullable, regs)?;
        }
        TypeDesc::Enum(id) => {
            out.v_i64 = interface::host_to_enum(bridge, value, *id, false)?;
        }
        TypeDesc::Flags(id) => {
            out.v_i64 = interface::host_to_enum(bridge, value, *id, true)?;
        }
        TypeDesc::Object(id) => {
            out = interface::host_to_object(bridge, value, *id, transfer, nullable)?;
        }
        TypeDesc::Callback(id) => {
            out = interface::host_to_callback(bridge, value, arg, *id, regs)?;
        }
        TypeDesc::ErrorValue => {
            return Err(MarshalError::UnhandledTag {
                tag: "error",
                context: "argument marshaling",
            });
        }
    }
    Ok(out)
}

/// Marshal one native slot into a host value.
///
/// Returns `Ok(None)` for slots with no host-side representation (a null
/// destroy-notify pointer, for example); callers skip those.
pub(crate) fn native_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    ty: &TypeDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<Option<HostValue>, MarshalError> {
    let own = transfer >= Transfer::Container;

    let value = match ty {
        TypeDesc::Void => {
            let key = slot.ptr() as usize as u64;
            let attached = regs
                .as_deref_mut()
                .and_then(|regs| regs.pending_by_key(key))
                .and_then(|tramp| tramp.user_data());
            attached.unwrap_or(HostValue::Undef)
        }
        TypeDesc::Bool => HostValue::Bool(unsafe { slot.v_i32 } != 0),
        TypeDesc::I8 => HostValue::Int(unsafe { slot.v_i8 }.into()),
        TypeDesc::U8 => HostValue::Int(unsafe { slot.v_u8 }.into()),
        TypeDesc::I16 => HostValue::Int(unsafe { slot.v_i16 }.into()),
        TypeDesc::U16 => HostValue::Int(unsafe { slot.v_u16 }.into()),
        TypeDesc::I32 => HostValue::Int(unsafe { slot.v_i32 }.into()),
        TypeDesc::U32 => HostValue::Int(unsafe { slot.v_u32 }.into()),
        TypeDesc::I64 => HostValue::Int(unsafe { slot.v_i64 }),
        TypeDesc::U64 => HostValue::Int(unsafe { slot.v_u64 } as i64),
        TypeDesc::F32 => HostValue::Float(unsafe { slot.v_f32 }.into()),
        TypeDesc::F64 => HostValue::Float(unsafe { slot.v_f64 }),
        TypeDesc::Char => {
            let code = unsafe { slot.v_u32 };
            match char::from_u32(code) {
                Some(c) => HostValue::Str(c.to_string()),
                None => HostValue::Undef,
            }
        }
        TypeDesc::Utf8 => {
            let p = slot.ptr() as *const c_char;
            let text = match unsafe { native::string_utf8(p) } {
                None => None,
                Some(Ok(s)) => Some(s),
                Some(Err(_)) => return Err(MarshalError::InvalidUtf8),
            };
            if own {
                unsafe { native::release(p as *mut c_void) };
            }
            text.map(HostValue::Str).unwrap_or(HostValue::Undef)
        }
        TypeDesc::Filename => {
            let p = slot.ptr() as *const c_char;
            let text = unsafe { native::string_lossy(p) };
            if own {
                unsafe { native::release(p as *mut c_void) };
            }
            text.map(HostValue::Str).unwrap_or(HostValue::Undef)
        }
        TypeDesc::Array(desc) => {
            return array::array_to_host(bridge, slot, desc, transfer, regs).map(Some);
        }
        TypeDesc::List(elem) => {
            return containers::list_to_host(bridge, slot, elem, transfer, regs).map(Some);
        }
        TypeDesc::Map(key, val) => {
            return containers::map_to_host(bridge, slot, key, val, transfer, regs).map(Some);
        }
        TypeDesc::Record(id) => {
            return interface::record_to_host(bridge, slot, *id, transfer, regs);
        }
        TypeDesc::Enum(id) => {
            return interface::enum_to_host(bridge, slot, *id, false).map(Some);
        }
        TypeDesc::Flags(id) => {
            return interface::enum_to_host(bridge, slot, *id, true).map(Some);
        }
        TypeDesc::Object(id) => {
            return interface::object_to_host(bridge, slot, *id, own).map(Some);
        }
        TypeDesc::Callback(id) => {
            return interface::callback_to_host(bridge, slot, *id);
        }
        TypeDesc::ErrorValue => {
            return Err(MarshalError::UnhandledTag {
                tag: "error",
                context: "result marshaling",
            });
        }
    };

    Ok(Some(value))
}
