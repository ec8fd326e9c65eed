//! The reverse trampoline: native code calling a host-supplied callable.
//!
//! States: `ENTER → MARSHAL_ARGS → INVOKE_HOST → MARSHAL_OUT → EXIT`. The
//! callback's own signature is always fully explicit — any receiver is an
//! ordinary leading argument — and the host-execution context is entered
//! and left around this one nested call, never held open across the
//! enclosing forward invocation. The trampoline itself is never released
//! here: native code may still read argument memory after the entry
//! returns, so call-scoped release belongs to the forward frame's cleanup
//! and notified-scoped release to the destroy-notify entry.

use std::ffi::c_void;
use std::sync::Arc;

use crate::closure::Trampoline;
use crate::descriptor::{Direction, Transfer, TypeDesc};
use crate::error::Result;
use crate::logging::{debug, trace};
use crate::marshal::{self, NativeSlot};
use crate::runtime::ScopeGuard;
use crate::value::HostCallable;

use super::{InvocationRegs, InvokeError, forward};

/// Run a host callable from native argument memory, writing out-values and
/// the return value back into native storage.
///
/// # Safety encapsulated
/// `args` is the libffi argument-pointer array for the trampoline's cif;
/// `result` is the libffi return buffer. Both come straight from the
/// closure entry.
pub(crate) fn invoke_host(
    tramp: &Arc<Trampoline>,
    args: *const *const c_void,
    result: *mut NativeSlot,
) -> Result<()> {
    let bridge = tramp.bridge().clone();
    let desc = Arc::clone(tramp.signature());
    let catalog = bridge.catalog();
    let n_args = desc.args.len();
    let mut regs = InvocationRegs::new();

    debug!(callback = %desc.name, n_args, "native code invoking host callable");

    // ENTER
    let _scope = ScopeGuard::enter(bridge.runtime());

    let mut ret_transfer = desc.ret.transfer;
    if ret_transfer == Transfer::None {
        // A borrowed return of an initially-unowned object would be freed
        // by the host's end-of-scope cleanup while native code still needs
        // it; force a full transfer instead.
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

    // First pass: capture every argument's raw slot, so array lengths can
    // be resolved no matter where the length argument sits.
    let mut in_slots = vec![NativeSlot::zeroed(); n_args];
    let mut out_ptrs: Vec<*mut c_void> = vec![std::ptr::null_mut(); n_args];
    for (i, arg) in desc.args.iter().enumerate() {
        let avalue = unsafe { *args.add(i) };
        match arg.direction {
            Direction::In => {
                in_slots[i] = unsafe { marshal::read_raw(avalue, &arg.ty, catalog) };
            }
            Direction::Out | Direction::InOut => {
                let storage = unsafe { *(avalue as *const *mut c_void) };
                out_ptrs[i] = storage;
                if arg.direction == Direction::InOut && !storage.is_null() {
                    in_slots[i] = unsafe { marshal::read_raw(storage, &arg.ty, catalog) };
                }
            }
        }
    }
    regs.arg_slots = in_slots.clone();

    // MARSHAL_ARGS
    let mut host_args = Vec::new();
    let mut pending_out = 0usize;
    for (i, arg) in desc.args.iter().enumerate() {
        // The user-data slot is handled separately, from the registration.
        if arg.closure_pos == Some(i) {
            continue;
        }
        regs.current_pos = Some(i);
        if matches!(arg.direction, Direction::In | Direction::InOut) {
            if let Some(value) =
                marshal::native_to_host(&bridge, &in_slots[i], &arg.ty, arg.transfer, Some(&mut regs))?
            {
                host_args.push(value);
            }
        }
        if matches!(arg.direction, Direction::Out | Direction::InOut) {
            pending_out += 1;
        }
    }
    regs.current_pos = None;

    if let Some(data) = tramp.user_data() {
        host_args.push(data);
    }

    let expected = pending_out + desc.has_return() as usize;

    // INVOKE_HOST
    let returned = match tramp.callable() {
        Some(HostCallable::Code(f)) => bridge
            .runtime()
            .call(f, &host_args, expected)
            .map_err(InvokeError::HostCallableFailed)?,
        Some(HostCallable::Method(name)) => bridge
            .runtime()
            .call_method(name, &host_args, expected)
            .map_err(InvokeError::HostCallableFailed)?,
        Some(HostCallable::Native { callable, address }) => {
            let sig = catalog
                .callable(*callable)
                .ok_or(marshal::MarshalError::UnresolvableType { kind: "callable" })?
                .clone();
            forward::invoke_callable(&bridge, &sig, *address, &host_args)?
        }
        None => {
            return Err(InvokeError::HostCallableFailed(anyhow::anyhow!(
                "trampoline for '{}' holds no callable",
                desc.name
            ))
            .into());
        }
    };

    if expected != 0 && returned.len() != expected {
        return Err(InvokeError::ResultArityMismatch {
            expected,
            got: returned.len(),
        }
        .into());
    }

    // MARSHAL_OUT: the host returns [return value, out values in
    // declaration order]; unwind them back into native storage.
    if expected != 0 {
        let has_ret = desc.has_return() as usize;
        let outs = returned.get(has_ret..).unwrap_or(&[]);
        let mut out_index = 0usize;
        for (i, arg) in desc.args.iter().enumerate() {
            if !matches!(arg.direction, Direction::Out | Direction::InOut) {
                continue;
            }
            let Some(value) = outs.get(out_index) else {
                break;
            };
            out_index += 1;
            let storage = out_ptrs[i];
            if storage.is_null() {
                trace!(pos = i, "skipping out argument with null storage");
                continue;
            }
            regs.current_pos = Some(i);
            match (&arg.ty, arg.caller_allocates) {
                (TypeDesc::Record(id), true) => {
                    // Caller-allocated record storage is filled in place.
                    marshal::host_record_fill(&bridge, value, *id, storage, Some(&mut regs))?;
                }
                (ty, _) => {
                    let slot = marshal::host_to_native(
                        &bridge,
                        value,
                        Some(arg),
                        ty,
                        arg.transfer,
                        true,
                        Some(&mut regs),
                    )?;
                    unsafe { marshal::write_raw(slot, storage, ty, catalog) };
                }
            }
        }
        regs.current_pos = None;

        if desc.has_return() && !result.is_null() {
            let value = returned.first().cloned().unwrap_or_default();
            let slot = marshal::host_to_native(
                &bridge,
                &value,
                None,
                &desc.ret.ty,
                ret_transfer,
                true,
                Some(&mut regs),
            )?;
            unsafe { marshal::write_return(slot, &desc.ret.ty, catalog, result) };
        }
    }

    // EXIT: native code reads the out storage after we return, so buffers
    // marshaled for it must outlive this frame.
    regs.forget_temps();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure;
    use crate::descriptor::{ArgDesc, CallableDesc, CallableKind, Catalog, Transfer, TypeDesc};
    use crate::error::Error;
    use crate::invoke::Bridge;
    use crate::runtime::BasicRuntime;
    use crate::value::{HostCallable, HostValue};

    fn split_bridge(results: Vec<HostValue>) -> (Bridge, Arc<crate::closure::Trampoline>) {
        let mut catalog = Catalog::new();
        let sig = catalog.add_callable(
            CallableDesc::new("split", CallableKind::Callback)
                .arg(ArgDesc::new("a", TypeDesc::I32))
                .arg(ArgDesc::new("b", TypeDesc::I32).out())
                .returns(TypeDesc::I32, Transfer::None),
        );
        let bridge = Bridge::new(Arc::new(catalog), Arc::new(BasicRuntime::new()));
        let tramp = closure::make_closure(
            &bridge,
            sig,
            HostCallable::Code(Arc::new(move |_args: &[HostValue]| Ok(results.clone()))),
        )
        .unwrap();
        (bridge, tramp)
    }

    #[test]
    fn wrong_result_count_raises_arity_mismatch() {
        let (_bridge, tramp) = split_bridge(vec![HostValue::Int(9)]);

        let a = 5i32;
        let mut b = 0i32;
        let mut b_ptr = &mut b as *mut i32;
        let args: [*const c_void; 2] = [
            &a as *const i32 as *const c_void,
            &mut b_ptr as *mut *mut i32 as *const c_void,
        ];
        let mut ret = NativeSlot::zeroed();
        let err = invoke_host(&tramp, args.as_ptr(), &mut ret).unwrap_err();
        assert!(matches!(
            err,
            Error::Invoke(InvokeError::ResultArityMismatch { expected: 2, got: 1 })
        ));
        closure::release(tramp.key());
    }

    #[test]
    fn results_unwind_into_out_and_return_slots() {
        let (_bridge, tramp) = split_bridge(vec![HostValue::Int(10), HostValue::Int(6)]);

        let a = 5i32;
        let mut b = 0i32;
        let mut b_ptr = &mut b as *mut i32;
        let args: [*const c_void; 2] = [
            &a as *const i32 as *const c_void,
            &mut b_ptr as *mut *mut i32 as *const c_void,
        ];
        let mut ret = NativeSlot::zeroed();
        invoke_host(&tramp, args.as_ptr(), &mut ret).unwrap();
        assert_eq!(b, 6);
        assert_eq!(unsafe { ret.v_i64 }, 10);
        closure::release(tramp.key());
    }
}
