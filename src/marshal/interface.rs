//! Marshaling for interface shapes: records, enums and flags, object
//! handles, callbacks, and the well-known container records.

use std::ffi::{c_char, c_void};

use crate::closure::{self, ClosureError};
use crate::descriptor::{EnumId, RecordDesc, RecordId, ScopePolicy, Transfer, TypeDesc, WellKnown};
use crate::descriptor::{ArgDesc, CallableId, ClassId};
use crate::invoke::{Bridge, InvocationRegs};
use crate::logging::trace;
use crate::native::{self, BoxTag, ValueBox};
use crate::registry::WrapperIdent;
use crate::value::{HostCallable, HostValue};

use super::{MarshalError, NativeSlot, host_to_native, native_to_host, read_raw, write_raw};

fn resolve_record(bridge: &Bridge, id: RecordId) -> Result<&RecordDesc, MarshalError> {
    bridge
        .catalog()
        .record(id)
        .ok_or(MarshalError::UnresolvableType { kind: "record" })
}

/// Marshal a host value into a record-typed slot.
pub(super) fn host_to_record(
    bridge: &Bridge,
    value: &HostValue,
    id: RecordId,
    transfer: Transfer,
    nullable: bool,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<NativeSlot, MarshalError> {
    let record = resolve_record(bridge, id)?;
    let mut out = NativeSlot::zeroed();

    match record.well_known {
        Some(WellKnown::OpaqueValue) => {
            if !value.is_defined() {
                return Ok(out);
            }
            let boxed = value_box_from_host(value)?;
            if transfer < Transfer::Container {
                if let Some(regs) = regs.as_deref_mut() {
                    // Free the box and any string payload with the frame.
                    regs.track_temp(unsafe { (*boxed).payload_for_cleanup() });
                    regs.track_temp(boxed as *mut c_void);
                }
            }
            out.v_ptr = boxed as *mut c_void;
            return Ok(out);
        }
        Some(WellKnown::ClosureContainer) => {
            if !value.is_defined() {
                return Ok(out);
            }
            let Some(sig_id) = record.closure_signature else {
                return Err(MarshalError::TypeMismatch {
                    expected: "closure container with signature".to_string(),
                    got: ClosureError::NoClosureSignature {
                        name: record.name.clone(),
                    }
                    .to_string(),
                });
            };
            return host_to_callback(bridge, value, None, sig_id, regs);
        }
        Some(WellKnown::Variant) | None => {}
    }

    if !value.is_defined() {
        if nullable || record.well_known == Some(WellKnown::Variant) {
            return Ok(out);
        }
        return Err(MarshalError::MissingValue {
            name: record.name.clone(),
        });
    }

    match value {
        // An already-wrapped instance: opaque handle exchange.
        HostValue::Object(_) => {
            let raw = bridge.wrappers().unwrap_record(value, id)?;
            out.v_ptr = if transfer == Transfer::Full {
                match record.boxed {
                    Some(ops) => unsafe { (ops.copy)(raw) },
                    None => {
                        // Unregistered type: byte copy is the only option.
                        let copy = native::alloc_zeroed(record.size);
                        unsafe {
                            std::ptr::copy_nonoverlapping(raw as *const u8, copy as *mut u8, record.size);
                        }
                        copy
                    }
                }
            } else {
                raw
            };
        }
        // Raw structured conversion through a host map.
        HostValue::Map(_) => {
            if record.fields.is_empty() {
                return Err(MarshalError::TypeMismatch {
                    expected: format!("wrapped '{}' instance", record.name),
                    got: "map".to_string(),
                });
            }
            let mem = native::alloc_zeroed(record.size);
            host_record_fill(bridge, value, id, mem, regs.as_deref_mut())?;
            if transfer < Transfer::Container {
                if let Some(regs) = regs.as_deref_mut() {
                    regs.track_temp(mem);
                }
            }
            out.v_ptr = mem;
        }
        other => {
            return Err(MarshalError::TypeMismatch {
                expected: record.name.clone(),
                got: format!("{other:?}"),
            });
        }
    }
    Ok(out)
}

/// Write a host value into pre-allocated record memory, field by field for
/// maps, by byte copy for wrapped instances. Used for value-semantics
/// destinations: caller-allocated storage, inline array elements, embedded
/// fields.
pub(crate) fn host_record_fill(
    bridge: &Bridge,
    value: &HostValue,
    id: RecordId,
    dest: *mut c_void,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<(), MarshalError> {
    let record = resolve_record(bridge, id)?;
    match value {
        HostValue::Undef => Ok(()),
        HostValue::Object(h) => {
            unsafe {
                std::ptr::copy_nonoverlapping(h.raw() as *const u8, dest as *mut u8, record.size);
            }
            Ok(())
        }
        HostValue::Map(_) => {
            // Field marshaling is positionless: no automatic-argument or
            // callback registrations may fire from in here.
            let saved = regs.as_deref_mut().and_then(|r| r.current_pos.take());
            let result = (|| {
                for field in &record.fields {
                    let field_value = value.map_get(&field.name).unwrap_or(&HostValue::Undef);
                    let target = unsafe { dest.add(field.offset) };
                    if let TypeDesc::Record(inner) = &field.ty {
                        host_record_fill(bridge, field_value, *inner, target, regs.as_deref_mut())?;
                    } else {
                        let slot = host_to_native(
                            bridge,
                            field_value,
                            None,
                            &field.ty,
                            Transfer::None,
                            true,
                            regs.as_deref_mut(),
                        )?;
                        unsafe { write_raw(slot, target, &field.ty, bridge.catalog()) };
                    }
                }
                Ok(())
            })();
            if let (Some(regs), Some(pos)) = (regs.as_deref_mut(), saved) {
                regs.current_pos = Some(pos);
            }
            result
        }
        other => Err(MarshalError::TypeMismatch {
            expected: record.name.clone(),
            got: format!("{other:?}"),
        }),
    }
}

/// Marshal a record-typed slot into a host value: well-known shortcuts
/// first, field-by-field maps for raw records, wrapper exchange otherwise.
pub(super) fn record_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    id: RecordId,
    transfer: Transfer,
    regs: Option<&mut InvocationRegs>,
) -> Result<Option<HostValue>, MarshalError> {
    let record = resolve_record(bridge, id)?;
    let ptr = slot.ptr();
    if ptr.is_null() {
        return Ok(Some(HostValue::Undef));
    }
    let own = transfer >= Transfer::Container;

    match record.well_known {
        Some(WellKnown::OpaqueValue) => {
            return Ok(Some(value_box_to_host(ptr as *mut ValueBox, own)));
        }
        Some(WellKnown::ClosureContainer) => {
            let sig = record
                .closure_signature
                .ok_or(MarshalError::UnresolvableType { kind: "callable" })?;
            return callback_to_host(bridge, slot, sig);
        }
        Some(WellKnown::Variant) | None => {}
    }

    if record.boxed.is_none() && !record.fields.is_empty() {
        // Raw structured type: field-by-field host-map conversion.
        let mut pairs = Vec::with_capacity(record.fields.len());
        let field_transfer = if transfer == Transfer::Full {
            Transfer::Full
        } else {
            Transfer::None
        };
        let mut regs = regs;
        for field in &record.fields {
            let src = unsafe { ptr.add(field.offset) };
            let field_slot = if let TypeDesc::Record(_) = &field.ty {
                // Embedded records are referenced in place.
                NativeSlot::from_ptr(src)
            } else {
                unsafe { read_raw(src, &field.ty, bridge.catalog()) }
            };
            let embedded_transfer = if matches!(field.ty, TypeDesc::Record(_)) {
                Transfer::None
            } else {
                field_transfer
            };
            if let Some(v) = native_to_host(
                bridge,
                &field_slot,
                &field.ty,
                embedded_transfer,
                regs.as_deref_mut(),
            )? {
                pairs.push((field.name.clone(), v));
            }
        }
        if own {
            unsafe { native::release(ptr) };
        }
        return Ok(Some(HostValue::Map(pairs)));
    }

    Ok(Some(bridge.wrappers().wrap_record(ptr, id, own)))
}

/// Convert a symbolic or integer host value to an enum/flags native value.
pub(super) fn host_to_enum(
    bridge: &Bridge,
    value: &HostValue,
    id: EnumId,
    flags: bool,
) -> Result<i64, MarshalError> {
    let desc = bridge
        .catalog()
        .enum_(id)
        .ok_or_else(|| MarshalError::UnknownEnumType {
            name: format!("enum #{}", id.0),
            value: format!("{value:?}"),
        })?;

    let lookup = |name: &str| {
        desc.value_of(name)
            .ok_or_else(|| MarshalError::UnknownEnumType {
                name: desc.name.clone(),
                value: name.to_string(),
            })
    };

    match value {
        HostValue::Undef => Ok(0),
        HostValue::Str(name) => lookup(name),
        HostValue::List(items) if flags => {
            let mut bits = 0i64;
            for item in items {
                match item {
                    HostValue::Str(name) => bits |= lookup(name)?,
                    other => bits |= other.as_i64(),
                }
            }
            Ok(bits)
        }
        other => Ok(other.as_i64()),
    }
}

/// Convert an enum/flags native value to its symbolic host form.
pub(super) fn enum_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    id: EnumId,
    flags: bool,
) -> Result<HostValue, MarshalError> {
    let desc = bridge
        .catalog()
        .enum_(id)
        .ok_or_else(|| MarshalError::UnknownEnumType {
            name: format!("enum #{}", id.0),
            value: String::new(),
        })?;
    let raw = unsafe { slot.v_i64 };

    if flags {
        let mut names = Vec::new();
        let mut seen = 0i64;
        for (name, bit) in &desc.values {
            if *bit != 0 && (raw & bit) == *bit {
                names.push(HostValue::Str(name.clone()));
                seen |= bit;
            }
        }
        if seen != raw {
            // Bits with no symbolic name surface numerically.
            return Ok(HostValue::Int(raw));
        }
        return Ok(HostValue::List(names));
    }

    Ok(match desc.name_of(raw) {
        Some(name) => HostValue::Str(name.to_string()),
        None => HostValue::Int(raw),
    })
}

/// Marshal a host wrapper into an object-handle slot, applying transfer-
/// aware reference adjustment.
pub(super) fn host_to_object(
    bridge: &Bridge,
    value: &HostValue,
    id: ClassId,
    transfer: Transfer,
    nullable: bool,
) -> Result<NativeSlot, MarshalError> {
    let mut out = NativeSlot::zeroed();
    if !value.is_defined() {
        if nullable {
            return Ok(out);
        }
        return Err(MarshalError::MissingValue {
            name: "object".to_string(),
        });
    }
    let raw = bridge.wrappers().unwrap_object(value, id)?;
    if let HostValue::Object(handle) = value {
        bridge.wrappers().adjust_object_ref(handle, id, transfer);
    }
    out.v_ptr = raw;
    Ok(out)
}

/// Wrap a native object pointer for the host.
pub(super) fn object_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    id: ClassId,
    own: bool,
) -> Result<HostValue, MarshalError> {
    Ok(bridge.wrappers().wrap_object(slot.ptr(), id, own))
}

/// Marshal a host callable into a callback slot.
///
/// An argument sitting at the destroy-notify position of a callback already
/// registered in this invocation gets the canonical release entry point and
/// consumes no host value. Otherwise a trampoline is created and registered
/// under the argument's scope policy; an absent host value registers a
/// code-less trampoline so the paired notify and data slots resolve to
/// null.
pub(super) fn host_to_callback(
    bridge: &Bridge,
    value: &HostValue,
    arg: Option<&ArgDesc>,
    id: CallableId,
    regs: Option<&mut InvocationRegs>,
) -> Result<NativeSlot, MarshalError> {
    let mut out = NativeSlot::zeroed();
    let mut regs = regs;

    if let Some(r) = regs.as_deref_mut() {
        if let Some(pos) = r.current_pos {
            if r.pending_notify(pos).is_some() {
                trace!(pos, "argument is the destroy notify of a pending callback");
                // This position consumes no host value.
                r.dynamic_stack_offset -= 1;
                out.v_ptr = closure::release_entry_ptr();
                return Ok(out);
            }
        }
    }

    let callable = match value {
        HostValue::Undef => None,
        HostValue::Callable(HostCallable::Native { address, .. }) => {
            // A callable that already is native code: pass it straight
            // through, no trampoline.
            out.v_ptr = *address as *mut c_void;
            return Ok(out);
        }
        HostValue::Callable(c) => Some(c.clone()),
        other => {
            return Err(MarshalError::NotACallable {
                name: arg
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| format!("{other:?}")),
            });
        }
    };

    let signature = bridge
        .catalog()
        .callable(id)
        .ok_or(MarshalError::UnresolvableType { kind: "callable" })?
        .clone();

    let (data_pos, notify_pos, scope) = match arg {
        Some(a) => (a.closure_pos, a.destroy_pos, a.scope),
        // Element/container callbacks have no companion positions and must
        // outlive the call.
        None => (None, None, ScopePolicy::Async),
    };

    let tramp = closure::create(bridge.clone(), signature, callable, data_pos, notify_pos, scope)
        .map_err(|e| MarshalError::TypeMismatch {
            expected: "callback".to_string(),
            got: e.to_string(),
        })?;

    if let Some(regs) = regs {
        if scope == ScopePolicy::Call {
            regs.free_after_call.push(tramp.key());
        }
        regs.callbacks.push(tramp.clone());
    }

    out.v_ptr = tramp.code_ptr();
    Ok(out)
}

/// Hand a native callback pointer to the host as a callable that forwards
/// back through the invocation engine. Null pointers have no host-side
/// representation and are skipped.
pub(super) fn callback_to_host(
    _bridge: &Bridge,
    slot: &NativeSlot,
    id: CallableId,
) -> Result<Option<HostValue>, MarshalError> {
    let ptr = slot.ptr();
    if ptr.is_null() {
        return Ok(None);
    }
    Ok(Some(HostValue::Callable(HostCallable::Native {
        callable: id,
        address: ptr as usize,
    })))
}

impl ValueBox {
    /// The payload pointer that needs a separate release, if any.
    pub(crate) unsafe fn payload_for_cleanup(&self) -> *mut c_void {
        if self.tag == BoxTag::Str as u32 {
            self.slot.ptr()
        } else {
            std::ptr::null_mut()
        }
    }
}

fn value_box_from_host(value: &HostValue) -> Result<*mut ValueBox, MarshalError> {
    let boxed = native::alloc_zeroed(std::mem::size_of::<ValueBox>()) as *mut ValueBox;
    let mut slot = NativeSlot::zeroed();
    let tag = match value {
        HostValue::Undef => BoxTag::Undef,
        HostValue::Bool(b) => {
            slot.v_i32 = *b as i32;
            BoxTag::Bool
        }
        HostValue::Int(v) => {
            slot.v_i64 = *v;
            BoxTag::Int
        }
        HostValue::Float(v) => {
            slot.v_f64 = *v;
            BoxTag::Float
        }
        HostValue::Str(s) => {
            slot.v_ptr = native::strdup(s) as *mut c_void;
            BoxTag::Str
        }
        HostValue::Object(h) => {
            slot.v_ptr = h.raw();
            BoxTag::Ptr
        }
        other => {
            unsafe { native::release(boxed as *mut c_void) };
            return Err(MarshalError::TypeMismatch {
                expected: "scalar or wrapped value".to_string(),
                got: format!("{other:?}"),
            });
        }
    };
    unsafe {
        (*boxed).tag = tag as u32;
        (*boxed).slot = slot;
    }
    Ok(boxed)
}

fn value_box_to_host(boxed: *mut ValueBox, own: bool) -> HostValue {
    let (tag, slot) = unsafe { ((*boxed).tag, (*boxed).slot) };
    let value = if tag == BoxTag::Bool as u32 {
        HostValue::Bool(unsafe { slot.v_i32 } != 0)
    } else if tag == BoxTag::Int as u32 {
        HostValue::Int(unsafe { slot.v_i64 })
    } else if tag == BoxTag::Float as u32 {
        HostValue::Float(unsafe { slot.v_f64 })
    } else if tag == BoxTag::Str as u32 {
        unsafe { native::string_lossy(slot.ptr() as *const c_char) }
            .map(HostValue::Str)
            .unwrap_or(HostValue::Undef)
    } else if tag == BoxTag::Ptr as u32 {
        HostValue::Int(slot.ptr() as usize as i64)
    } else {
        HostValue::Undef
    };
    if own {
        unsafe {
            if tag == BoxTag::Str as u32 {
                native::release(slot.ptr());
            }
            native::release(boxed as *mut c_void);
        }
    }
    value
}

/// Unwrap a method receiver to its native pointer: object classes through
/// the wrapper registry, records by handle.
pub(crate) fn receiver_pointer(
    _bridge: &Bridge,
    value: &HostValue,
) -> Result<*mut c_void, MarshalError> {
    match value {
        HostValue::Object(h) => match h.ident() {
            WrapperIdent::Class(_) | WrapperIdent::Record(_) => Ok(h.raw()),
        },
        other => Err(MarshalError::TypeMismatch {
            expected: "wrapped instance receiver".to_string(),
            got: format!("{other:?}"),
        }),
    }
}
