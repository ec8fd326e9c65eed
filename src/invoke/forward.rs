//! The forward frame builder: a host call into native code.
//!
//! States: `ANALYZE → MARSHAL_IN_OUT → FILL_AUTOMATIC → CALL → CHECK_ERROR
//! → MARSHAL_RETURN → CLEANUP`. Three slot pools back the frame: `in` for
//! by-value arguments, `out` for pointers handed to the callee, `aux` for
//! the storage those pointers reference. Call-scoped trampolines are
//! released exactly once whether the call completes or aborts; the frame's
//! temporary buffers are freed only on the success path and deliberately
//! leaked on abort rather than risking a double free against partially
//! constructed state.

use std::ffi::c_void;
use std::sync::Arc;

use libffi::middle::{Cif, Type};
use libffi::raw;

use crate::closure;
use crate::descriptor::layout::layout_of;
use crate::descriptor::{CallableDesc, CallableKind, Direction, Transfer, TypeDesc};
use crate::error::Result;
use crate::logging::{debug, trace};
use crate::marshal::{self, NativeSlot};
use crate::native::{self, RaisedError};
use crate::value::HostValue;

use super::{Bridge, InvocationRegs, InvokeError, automatic_positions};

/// Invoke a native callable from host-supplied arguments.
pub(crate) fn invoke_callable(
    bridge: &Bridge,
    desc: &Arc<CallableDesc>,
    address: usize,
    host_args: &[HostValue],
) -> Result<Vec<HostValue>> {
    let mut regs = InvocationRegs::new();
    let result = run_frame(bridge, desc, address, host_args, &mut regs);
    // Exactly once, success or abort; the registry guards double release.
    regs.release_call_scoped();
    if result.is_ok() {
        regs.free_temps();
    }
    result
}

fn frame_error(reason: impl Into<String>) -> InvokeError {
    InvokeError::CallFrameConstructionError {
        reason: reason.into(),
    }
}

#[allow(clippy::too_many_lines)]
fn run_frame(
    bridge: &Bridge,
    desc: &Arc<CallableDesc>,
    address: usize,
    host_args: &[HostValue],
    regs: &mut InvocationRegs,
) -> Result<Vec<HostValue>> {
    let catalog = bridge.catalog();

    // ANALYZE
    let n_args = desc.args.len();
    let is_method = desc.is_method();
    let is_constructor = desc.kind == CallableKind::Constructor;
    let method_offset = is_method as usize;
    let stack_offset = is_constructor as usize;
    let n_invoke = n_args + method_offset + desc.throws as usize;
    let automatic = automatic_positions(desc);

    let mut ret_transfer = desc.ret.transfer;
    if is_constructor {
        // Constructors of initially-unowned classes sink the floating
        // reference: the annotation says borrowed, the caller really owns.
        if let TypeDesc::Object(class) = &desc.ret.ty {
            if catalog
                .class(*class)
                .map(|c| c.initially_unowned)
                .unwrap_or(false)
            {
                ret_transfer = Transfer::Full;
            }
        }
    }

    debug!(
        name = %desc.name,
        n_args,
        n_invoke,
        is_method,
        is_constructor,
        throws = desc.throws,
        "invoking native callable"
    );

    let mut in_slots = vec![NativeSlot::zeroed(); n_args].into_boxed_slice();
    let mut out_slots = vec![NativeSlot::zeroed(); n_args].into_boxed_slice();
    let mut aux_slots = vec![NativeSlot::zeroed(); n_args].into_boxed_slice();
    let mut ffi_types = vec![Type::pointer(); n_invoke];
    let mut arg_values: Vec<*mut c_void> = vec![std::ptr::null_mut(); n_invoke];

    let in_base = in_slots.as_mut_ptr();
    let out_base = out_slots.as_mut_ptr();
    let aux_base = aux_slots.as_mut_ptr();

    let mut instance_slot = NativeSlot::zeroed();
    if is_method {
        let receiver = host_args.get(stack_offset).unwrap_or(&HostValue::Undef);
        instance_slot.v_ptr = marshal::receiver_pointer(bridge, receiver).map_err(|_| {
            InvokeError::MissingReceiver {
                name: desc.name.clone(),
            }
        })?;
        arg_values[0] = &mut instance_slot as *mut NativeSlot as *mut c_void;
    }

    // MARSHAL_IN_OUT
    for i in 0..n_args {
        let arg = &desc.args[i];
        let ffi_pos = i + method_offset;
        regs.current_pos = Some(i);

        let host_pos = (i + method_offset + stack_offset) as isize + regs.dynamic_stack_offset;
        let host_val = usize::try_from(host_pos)
            .ok()
            .and_then(|p| host_args.get(p))
            .unwrap_or(&HostValue::Undef);

        trace!(
            pos = i,
            name = %arg.name,
            direction = ?arg.direction,
            is_automatic = automatic[i],
            "marshaling argument"
        );

        match arg.direction {
            Direction::In => {
                if automatic[i] || arg.skip {
                    regs.dynamic_stack_offset -= 1;
                } else {
                    let slot = marshal::host_to_native(
                        bridge,
                        host_val,
                        Some(arg),
                        &arg.ty,
                        arg.transfer,
                        arg.nullable,
                        Some(regs),
                    )?;
                    unsafe { *in_base.add(i) = slot };
                }
                ffi_types[ffi_pos] = marshal::ffi_type_of(&arg.ty, catalog)
                    .ok_or_else(|| frame_error(format!("argument '{}'", arg.name)))?;
                arg_values[ffi_pos] = unsafe { in_base.add(i) } as *mut c_void;
            }
            Direction::Out => {
                if arg.caller_allocates {
                    let layout = layout_of(&arg.ty, catalog)
                        .ok_or_else(|| frame_error(format!("out argument '{}'", arg.name)))?;
                    unsafe {
                        (*aux_base.add(i)).v_ptr = native::alloc_zeroed(layout.size);
                        (*out_base.add(i)).v_ptr = aux_base.add(i) as *mut c_void;
                    }
                    arg_values[ffi_pos] = unsafe { aux_base.add(i) } as *mut c_void;
                } else {
                    unsafe {
                        (*out_base.add(i)).v_ptr = aux_base.add(i) as *mut c_void;
                    }
                    arg_values[ffi_pos] = unsafe { out_base.add(i) } as *mut c_void;
                }
                // An out argument must not eat up a host value.
                regs.dynamic_stack_offset -= 1;
            }
            Direction::InOut => {
                unsafe {
                    (*in_base.add(i)).v_ptr = aux_base.add(i) as *mut c_void;
                    (*out_base.add(i)).v_ptr = aux_base.add(i) as *mut c_void;
                }
                if automatic[i] || arg.skip {
                    regs.dynamic_stack_offset -= 1;
                } else {
                    let slot = marshal::host_to_native(
                        bridge,
                        host_val,
                        Some(arg),
                        &arg.ty,
                        arg.transfer,
                        arg.nullable,
                        Some(regs),
                    )?;
                    unsafe { *aux_base.add(i) = slot };
                }
                arg_values[ffi_pos] = unsafe { in_base.add(i) } as *mut c_void;
            }
        }
    }
    regs.current_pos = None;

    // FILL_AUTOMATIC
    for i in 0..n_args {
        if !automatic[i] {
            continue;
        }
        let arg = &desc.args[i];
        let target = match arg.direction {
            Direction::In => unsafe { in_base.add(i) },
            Direction::InOut => unsafe { aux_base.add(i) },
            // Filled by the callee.
            Direction::Out => continue,
        };
        if let Some(length) = regs.pending_length(i) {
            trace!(pos = i, length, "setting automatic array length");
            unsafe { (*target).v_size = length };
        } else if let Some(tramp) = regs.pending_notify(i) {
            // No callable means no generated code: install a null notify,
            // not the release entry.
            let notify = if tramp.code_ptr().is_null() {
                std::ptr::null_mut()
            } else {
                closure::release_entry_ptr()
            };
            trace!(pos = i, has_notify = !notify.is_null(), "setting automatic destroy notify");
            unsafe { (*target).v_ptr = notify };
        } else {
            return Err(InvokeError::UnhandledAutomaticArgument { pos: i }.into());
        }
    }

    // Synthesized trailing error slot for throwing callables.
    let mut raised: *mut RaisedError = std::ptr::null_mut();
    let mut raised_arg: *mut c_void = &mut raised as *mut *mut RaisedError as *mut c_void;
    if desc.throws {
        arg_values[n_invoke - 1] = &mut raised_arg as *mut *mut c_void as *mut c_void;
    }

    // CALL
    let ret_ffi = marshal::ffi_return_type(&desc.ret.ty, catalog)
        .ok_or_else(|| frame_error("return type"))?;
    let cif = Cif::new(ffi_types, ret_ffi);
    let mut ret_slot = NativeSlot::zeroed();
    unsafe {
        let code: unsafe extern "C" fn() = std::mem::transmute(address);
        raw::ffi_call(
            cif.as_raw_ptr(),
            Some(code),
            &mut ret_slot as *mut NativeSlot as *mut c_void,
            arg_values.as_mut_ptr(),
        );
    }

    // Call-scoped trampolines die with the native call, before any result
    // marshaling can re-enter host code.
    regs.release_call_scoped();

    // CHECK_ERROR
    if desc.throws && !raised.is_null() {
        let (code, message) = unsafe { RaisedError::take(raised) };
        return Err(InvokeError::NativeReportedError { code, message }.into());
    }

    // MARSHAL_RETURN
    regs.arg_slots = (0..n_args)
        .map(|i| match desc.args[i].direction {
            Direction::In => in_slots[i],
            _ => aux_slots[i],
        })
        .collect();

    let mut results = Vec::new();
    if desc.has_return() && !desc.ret.skip {
        if let Some(value) =
            marshal::native_to_host(bridge, &ret_slot, &desc.ret.ty, ret_transfer, Some(regs))?
        {
            results.push(value);
        }
    }

    for i in 0..n_args {
        let arg = &desc.args[i];
        if automatic[i] || arg.skip {
            continue;
        }
        if !matches!(arg.direction, Direction::Out | Direction::InOut) {
            continue;
        }
        // Memory we allocated ourselves is always ours to release.
        let transfer = if arg.caller_allocates {
            Transfer::Container
        } else {
            arg.transfer
        };
        if let Some(value) =
            marshal::native_to_host(bridge, &aux_slots[i], &arg.ty, transfer, Some(regs))?
        {
            results.push(value);
        }
    }

    debug!(name = %desc.name, n_results = results.len(), "native call completed");

    // CLEANUP happens in the caller: call-scoped release already ran, the
    // temp buffers go once the results are safely owned by the host.
    Ok(results)
}
