//! Array marshaling: contiguous native buffers with zero-terminated,
//! fixed, or automatic-length counting.

use std::ffi::c_void;

use crate::descriptor::layout::layout_of;
use crate::descriptor::{ArrayDesc, ArrayLength, Transfer, TypeDesc};
use crate::invoke::{Bridge, InvocationRegs};
use crate::logging::trace;
use crate::native;
use crate::value::HostValue;

use super::{MarshalError, NativeSlot, host_record_fill, host_to_native, native_to_host, read_raw, write_raw};

/// Marshal a host sequence into a native array buffer.
///
/// For a variable-length array the eventual count is registered before the
/// absent-value check, so the paired length slot is later filled with zero
/// when the host passed nothing at all.
pub(super) fn host_to_array(
    bridge: &Bridge,
    value: &HostValue,
    desc: &ArrayDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<NativeSlot, MarshalError> {
    let mut out = NativeSlot::zeroed();

    let length_reg = match (desc.length.clone(), regs.as_deref_mut()) {
        (ArrayLength::Arg(pos), Some(regs)) if regs.current_pos.is_some() => {
            Some(regs.register_array_length(pos))
        }
        _ => None,
    };

    if !value.is_defined() {
        return Ok(out);
    }
    let HostValue::List(items) = value else {
        return Err(MarshalError::TypeMismatch {
            expected: "sequence".to_string(),
            got: format!("{value:?}"),
        });
    };

    // A container transfer hands over the buffer but not the elements.
    let item_transfer = if transfer == Transfer::Container {
        Transfer::None
    } else {
        transfer
    };

    let elem_layout = layout_of(&desc.elem, bridge.catalog())
        .ok_or(MarshalError::UnresolvableType { kind: "array element" })?;
    let count = match desc.length {
        ArrayLength::Fixed(n) => n.min(items.len()),
        _ => items.len(),
    };
    let zero_terminated = matches!(desc.length, ArrayLength::ZeroTerminated);
    let slots = match desc.length {
        ArrayLength::Fixed(n) => n,
        _ => count + zero_terminated as usize,
    };
    let buffer = native::alloc_zeroed(slots.max(1) * elem_layout.size);

    trace!(
        count,
        elem_size = elem_layout.size,
        zero_terminated,
        "marshaling host sequence to native array"
    );

    // Element marshaling is positionless.
    let saved = regs.as_deref_mut().and_then(|r| r.current_pos.take());
    let result = (|| {
        for (i, item) in items.iter().take(count).enumerate() {
            let target = unsafe { buffer.add(i * elem_layout.size) };
            match (&*desc.elem, desc.value_elements) {
                (TypeDesc::Record(id), true) => {
                    host_record_fill(bridge, item, *id, target, regs.as_deref_mut())?;
                }
                (elem, _) => {
                    let slot = host_to_native(
                        bridge,
                        item,
                        None,
                        elem,
                        item_transfer,
                        true,
                        regs.as_deref_mut(),
                    )?;
                    unsafe { write_raw(slot, target, elem, bridge.catalog()) };
                }
            }
        }
        Ok(())
    })();
    if let (Some(regs), Some(pos)) = (regs.as_deref_mut(), saved) {
        regs.current_pos = Some(pos);
    }
    if let Err(err) = result {
        // Abort path: the buffer is deliberately left allocated rather than
        // risking a double free against partially-marshaled elements.
        return Err(err);
    }

    if let (Some(idx), Some(regs)) = (length_reg, regs.as_deref_mut()) {
        regs.array_lengths[idx].length = count;
    }
    if transfer == Transfer::None {
        if let Some(regs) = regs.as_deref_mut() {
            regs.track_temp(buffer);
        }
    }

    out.v_ptr = buffer;
    Ok(out)
}

/// Marshal a native array buffer into an ordered host sequence.
///
/// The length comes from zero termination, the fixed size, or the value of
/// a previously marshaled length argument.
pub(super) fn array_to_host(
    bridge: &Bridge,
    slot: &NativeSlot,
    desc: &ArrayDesc,
    transfer: Transfer,
    mut regs: Option<&mut InvocationRegs>,
) -> Result<HostValue, MarshalError> {
    let ptr = slot.ptr();
    if ptr.is_null() {
        return Ok(HostValue::Undef);
    }

    let elem_layout = layout_of(&desc.elem, bridge.catalog())
        .ok_or(MarshalError::UnresolvableType { kind: "array element" })?;

    let length = match &desc.length {
        ArrayLength::Fixed(n) => *n,
        ArrayLength::ZeroTerminated => unsafe { zero_terminated_len(ptr, elem_layout.size) },
        ArrayLength::Arg(pos) => regs
            .as_deref_mut()
            .and_then(|regs| regs.slot_length(*pos).or_else(|| regs.pending_length(*pos)))
            .ok_or(MarshalError::LengthIndeterminate)?,
    };

    let item_transfer = if transfer == Transfer::Full {
        Transfer::Full
    } else {
        Transfer::None
    };

    trace!(length, elem_size = elem_layout.size, "marshaling native array to host");

    let mut items = Vec::with_capacity(length);
    for i in 0..length {
        let src = unsafe { ptr.add(i * elem_layout.size) };
        let elem_slot = match (&*desc.elem, desc.value_elements) {
            (TypeDesc::Record(_), true) => NativeSlot::from_ptr(src),
            (elem, _) => unsafe { read_raw(src, elem, bridge.catalog()) },
        };
        let elem_transfer = if matches!(&*desc.elem, TypeDesc::Record(_)) && desc.value_elements {
            Transfer::None
        } else {
            item_transfer
        };
        if let Some(v) = native_to_host(
            bridge,
            &elem_slot,
            &desc.elem,
            elem_transfer,
            regs.as_deref_mut(),
        )? {
            items.push(v);
        }
    }

    if transfer >= Transfer::Container {
        unsafe { native::release(ptr) };
    }

    Ok(HostValue::List(items))
}

/// Count the elements of a zero-terminated buffer: the first element whose
/// bytes are all zero ends the array.
unsafe fn zero_terminated_len(ptr: *const c_void, elem_size: usize) -> usize {
    let mut n = 0usize;
    loop {
        let elem = unsafe { std::slice::from_raw_parts((ptr as *const u8).add(n * elem_size), elem_size) };
        if elem.iter().all(|b| *b == 0) {
            return n;
        }
        n += 1;
    }
}
