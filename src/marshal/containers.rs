//! Linked-list and associative-container marshaling over the native node
//! chains from [`crate::native`].
//!
//! Node payloads are pointer-width: pointer shapes travel as pointers,
//! integer shapes are cast inline into the payload word.

use std::ffi::c_void;

use crate::descriptor::{Transfer, TypeDesc};
use crate::invoke::{Bridge, InvocationRegs};
use crate::native::{self, ListNode, MapNode};
use crate::value::HostValue;

use super::{MarshalError, NativeSlot, host_to_native, native_to_host};

/// Pack a marshaled element into a pointer-width node payload.
fn slot_to_payload(slot: &NativeSlot, ty: &TypeDesc) -> *mut c_void {
    match ty {
        TypeDesc::Bool
        | TypeDesc::I8
        | TypeDesc::U8
        | TypeDesc::I16
        | TypeDesc::U16
        | TypeDesc::I32
        | TypeDesc::U32
        | TypeDesc::I64
        | TypeDesc::U64
        | TypeDesc::Char
        | TypeDesc::Enum(_)
        | TypeDesc::Flags(_) => unsafe { slot.v_size as *mut c_void },
        _ => slot.ptr(),
    }
}

/// Unpack a pointer-width node payload back into a slot.
fn payload_to_slot(payload: *mut c_void, ty: &TypeDesc) -> NativeSlot {
    let mut slot = NativeSlot::zeroed();
    match ty {
        TypeDesc::Bool
        | TypeDesc::I8
        | TypeDesc::U8
        | TypeDesc::I16
        | TypeDesc::U16
        | TypeDesc::I32
        | TypeDesc::U32
        | TypeDesc::I64
        | TypeDesc::U64
        | TypeDesc::Char
        | TypeDesc::Enum(_)
        | TypeDesc::Flags(_) => slot.v_size = payload as usize,
        _ => slot.v_ptr = payload,
    }
    slot
}

fn item_transfer_in(transfer: Transfer) -> Transfer {
    if transfer == Transfer::Container {
        Transfer::None
    } else {
        transfer
    }
}

fn item_transfer_out(transfer: Transfer) -> Transfer {
    if transfer == Transfer::Full {
        Transfer::Full
    } else {
        Transfer::None
    }
}

/// Marshal a host sequence into a native list chain.
pub(super) fn host_to_list(
    bridge: &Bridge,
    value: &HostValue,
    elem: &TypeDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<NativeSlot, MarshalError> {
    let mut out = NativeSlot::zeroed();
    if !value.is_defined() {
        return Ok(out);
    }
    let HostValue::List(items) = value else {
        return Err(MarshalError::TypeMismatch {
            expected: "sequence".to_string(),
            got: format!("{value:?}"),
        });
    };

    let item_transfer = item_transfer_in(transfer);
    let borrowed = transfer == Transfer::None;

    let saved = regs.as_deref_mut().and_then(|r| r.current_pos.take());
    let mut head: *mut ListNode = std::ptr::null_mut();
    let mut tail: *mut ListNode = std::ptr::null_mut();
    let result = (|| {
        for item in items {
            let slot =
                host_to_native(bridge, item, None, elem, item_transfer, true, regs.as_deref_mut())?;
            let node = native::alloc_zeroed(std::mem::size_of::<ListNode>()) as *mut ListNode;
            unsafe {
                (*node).data = slot_to_payload(&slot, elem);
            }
            if borrowed {
                if let Some(regs) = regs.as_deref_mut() {
                    regs.track_temp(node as *mut c_void);
                }
            }
            if head.is_null() {
                head = node;
            } else {
                unsafe { (*tail).next = node };
            }
            tail = node;
        }
        Ok(())
    })();
    if let (Some(regs), Some(pos)) = (regs.as_deref_mut(), saved) {
        regs.current_pos = Some(pos);
    }
    result?;

    out.v_ptr = head as *mut c_void;
    Ok(out)
}

/// Marshal a native list chain into a host sequence.
pub(super) fn list_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    elem: &TypeDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<HostValue, MarshalError> {
    let head = slot.ptr() as *mut ListNode;
    if head.is_null() {
        return Ok(HostValue::List(Vec::new()));
    }

    let item_transfer = item_transfer_out(transfer);
    let mut items = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        let payload = unsafe { (*cur).data };
        let elem_slot = payload_to_slot(payload, elem);
        if let Some(v) = native_to_host(bridge, &elem_slot, elem, item_transfer, regs.as_deref_mut())? {
            items.push(v);
        }
        cur = unsafe { (*cur).next };
    }

    if transfer >= Transfer::Container {
        unsafe { native::free_list_nodes(head) };
    }

    Ok(HostValue::List(items))
}

/// Marshal a host map into a keyed native chain.
pub(super) fn host_to_map(
    bridge: &Bridge,
    value: &HostValue,
    key_ty: &TypeDesc,
    val_ty: &TypeDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<NativeSlot, MarshalError> {
    let mut out = NativeSlot::zeroed();
    if !value.is_defined() {
        return Ok(out);
    }
    let HostValue::Map(pairs) = value else {
        return Err(MarshalError::TypeMismatch {
            expected: "map".to_string(),
            got: format!("{value:?}"),
        });
    };

    let item_transfer = item_transfer_in(transfer);
    let borrowed = transfer == Transfer::None;

    let saved = regs.as_deref_mut().and_then(|r| r.current_pos.take());
    let mut head: *mut MapNode = std::ptr::null_mut();
    let mut tail: *mut MapNode = std::ptr::null_mut();
    let result = (|| {
        for (key, val) in pairs {
            let key_value = HostValue::Str(key.clone());
            let key_slot = host_to_native(
                bridge,
                &key_value,
                None,
                key_ty,
                item_transfer,
                true,
                regs.as_deref_mut(),
            )?;
            let val_slot =
                host_to_native(bridge, val, None, val_ty, item_transfer, true, regs.as_deref_mut())?;
            let node = native::alloc_zeroed(std::mem::size_of::<MapNode>()) as *mut MapNode;
            unsafe {
                (*node).key = slot_to_payload(&key_slot, key_ty);
                (*node).value = slot_to_payload(&val_slot, val_ty);
            }
            if borrowed {
                if let Some(regs) = regs.as_deref_mut() {
                    regs.track_temp(node as *mut c_void);
                }
            }
            if head.is_null() {
                head = node;
            } else {
                unsafe { (*tail).next = node };
            }
            tail = node;
        }
        Ok(())
    })();
    if let (Some(regs), Some(pos)) = (regs.as_deref_mut(), saved) {
        regs.current_pos = Some(pos);
    }
    result?;

    out.v_ptr = head as *mut c_void;
    Ok(out)
}

/// Marshal a keyed native chain into a host map.
pub(super) fn map_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    key_ty: &TypeDesc,
    val_ty: &TypeDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<HostValue, MarshalError> {
    let head = slot.ptr() as *mut MapNode;
    if head.is_null() {
        return Ok(HostValue::Map(Vec::new()));
    }

    let item_transfer = item_transfer_out(transfer);
    let mut pairs = Vec::new();
    let mut cur = head;
    while !cur.is_null() {
        let (key_payload, val_payload) = unsafe { ((*cur).key, (*cur).value) };
        let key_slot = payload_to_slot(key_payload, key_ty);
        let val_slot = payload_to_slot(val_payload, val_ty);
        let key = native_to_host(bridge, &key_slot, key_ty, item_transfer, regs.as_deref_mut())?
            .and_then(|k| k.to_text())
            .unwrap_or_default();
        if let Some(v) =
            native_to_host(bridge, &val_slot, val_ty, item_transfer, regs.as_deref_mut())?
        {
            pairs.push((key, v));
        }
        cur = unsafe { (*cur).next };
    }

    if transfer >= Transfer::Container {
        unsafe { native::free_map_nodes(head) };
    }

    Ok(HostValue::Map(pairs))
}
