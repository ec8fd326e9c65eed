//! Invocation engine: shared bookkeeping, the forward frame builder, and
//! the reverse trampoline.
//!
//! Both directions share [`InvocationRegs`], the per-call registration
//! table: pending array lengths, pending callback trampolines, call-scoped
//! release lists, and the temporary buffers the frame owns for borrowed
//! (no-transfer) values. A forward call flows `ANALYZE → MARSHAL_IN_OUT →
//! FILL_AUTOMATIC → CALL → CHECK_ERROR → MARSHAL_RETURN → CLEANUP`; the
//! reverse direction mirrors it from native code into the host.

mod error;
pub(crate) mod forward;
pub(crate) mod reverse;

pub use error::InvokeError;

use std::ffi::c_void;
use std::sync::Arc;

use crate::closure::{self, Trampoline};
use crate::descriptor::{
    ArrayLength, CallableDesc, CallableId, Catalog, Direction, TypeDesc,
};
use crate::error::{Error, Result};
use crate::marshal::NativeSlot;
use crate::registry::WrapperRegistry;
use crate::runtime::HostRuntime;
use crate::value::HostValue;

/// Shared engine state: the injected collaborators every marshaling and
/// invocation step reads.
pub(crate) struct BridgeInner {
    pub catalog: Arc<Catalog>,
    pub wrappers: WrapperRegistry,
    pub runtime: Arc<dyn HostRuntime>,
}

/// The engine's entry point, cheap to clone and share.
///
/// A bridge binds a frozen descriptor [`Catalog`] to a [`HostRuntime`] and
/// exposes one invocation entry per discovered callable.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(catalog: Arc<Catalog>, runtime: Arc<dyn HostRuntime>) -> Self {
        let wrappers = WrapperRegistry::new(Arc::clone(&catalog));
        Self {
            inner: Arc::new(BridgeInner {
                catalog,
                wrappers,
                runtime,
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn wrappers(&self) -> &WrapperRegistry {
        &self.inner.wrappers
    }

    pub fn runtime(&self) -> &dyn HostRuntime {
        &*self.inner.runtime
    }

    /// Invoke a registered callable with an ordered host argument list,
    /// returning the ordered host result list (return value first, then
    /// OUT/INOUT values in declaration order).
    pub fn call(&self, id: CallableId, args: &[HostValue]) -> Result<Vec<HostValue>> {
        let desc = self
            .inner
            .catalog
            .callable(id)
            .ok_or(crate::marshal::MarshalError::UnresolvableType { kind: "callable" })?
            .clone();
        self.call_desc(&desc, args)
    }

    /// Invoke a callable descriptor directly. The descriptor must carry a
    /// resolved native address.
    pub fn call_desc(&self, desc: &Arc<CallableDesc>, args: &[HostValue]) -> Result<Vec<HostValue>> {
        let address = desc.address.ok_or_else(|| {
            Error::from(InvokeError::UnresolvedAddress {
                name: desc.name.clone(),
            })
        })?;
        forward::invoke_callable(self, desc, address, args)
    }

    /// Invoke a callable descriptor at an explicit address, for entry points
    /// resolved outside the catalog.
    pub fn call_at(
        &self,
        desc: &Arc<CallableDesc>,
        address: usize,
        args: &[HostValue],
    ) -> Result<Vec<HostValue>> {
        forward::invoke_callable(self, desc, address, args)
    }
}

/// Pending array-length registration: the length argument at `length_pos`
/// will be filled with `length` during the automatic pass.
#[derive(Debug)]
pub(crate) struct ArrayLengthReg {
    pub length_pos: usize,
    pub length: usize,
}

/// Per-invocation registration table shared between the marshaler and the
/// state machines of both directions.
#[derive(Default)]
pub(crate) struct InvocationRegs {
    /// Argument position currently being marshaled; `None` while inside
    /// nested element marshaling, where position-based registrations must
    /// not fire.
    pub current_pos: Option<usize>,
    /// Cumulative shift between host argument index and native argument
    /// index, from automatic/skipped/out arguments.
    pub dynamic_stack_offset: isize,
    /// Pending automatic array lengths.
    pub array_lengths: Vec<ArrayLengthReg>,
    /// Trampolines created for this invocation's callback arguments.
    pub callbacks: Vec<Arc<Trampoline>>,
    /// Keys of call-scoped trampolines to release when the call ends.
    pub free_after_call: Vec<u64>,
    /// Buffers the frame owns on behalf of borrowed (no-transfer) values;
    /// freed in CLEANUP on the success path, deliberately leaked on abort.
    pub temps: Vec<*mut c_void>,
    /// Raw per-position slots of the arguments already read, for length
    /// lookups while demarshaling arrays.
    pub arg_slots: Vec<NativeSlot>,
}

impl InvocationRegs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a buffer until CLEANUP.
    pub(crate) fn track_temp(&mut self, ptr: *mut c_void) {
        if !ptr.is_null() {
            self.temps.push(ptr);
        }
    }

    /// Register a pending array length; returns its index for later update.
    pub(crate) fn register_array_length(&mut self, length_pos: usize) -> usize {
        self.array_lengths.push(ArrayLengthReg {
            length_pos,
            length: 0,
        });
        self.array_lengths.len() - 1
    }

    /// Resolve an automatic length position from the pending registrations.
    pub(crate) fn pending_length(&self, pos: usize) -> Option<usize> {
        self.array_lengths
            .iter()
            .find(|r| r.length_pos == pos)
            .map(|r| r.length)
    }

    /// Length of an array determined by a previously read length argument.
    pub(crate) fn slot_length(&self, pos: usize) -> Option<usize> {
        self.arg_slots.get(pos).map(|s| unsafe { s.v_size })
    }

    /// Pending trampoline whose destroy-notify position is `pos`.
    pub(crate) fn pending_notify(&self, pos: usize) -> Option<&Arc<Trampoline>> {
        self.callbacks.iter().find(|t| t.notify_pos() == Some(pos))
    }

    /// Pending trampoline whose user-data position is `pos`.
    pub(crate) fn pending_data(&self, pos: usize) -> Option<&Arc<Trampoline>> {
        self.callbacks.iter().find(|t| t.data_pos() == Some(pos))
    }

    /// Pending trampoline by correlation key.
    pub(crate) fn pending_by_key(&self, key: u64) -> Option<&Arc<Trampoline>> {
        self.callbacks.iter().find(|t| t.key() == key)
    }

    /// Release every call-scoped trampoline exactly once. Safe to call from
    /// both the success path and the abort path; the drain makes the second
    /// call a no-op and the registry guards double release.
    pub(crate) fn release_call_scoped(&mut self) {
        for key in self.free_after_call.drain(..) {
            closure::release(key);
        }
    }

    /// Free the frame-owned temporaries. Success path only.
    pub(crate) fn free_temps(&mut self) {
        for ptr in self.temps.drain(..) {
            unsafe { crate::native::release(ptr) };
        }
    }

    /// Drop temporaries without freeing them, when native code may still
    /// read them after the frame unwinds.
    pub(crate) fn forget_temps(&mut self) {
        self.temps.clear();
    }
}

/// Mark the argument positions that are filled in automatically and thus
/// have no host-side counterpart: paired array lengths, callback destroy
/// notifications, and the length argument of an array return value when it
/// is an OUT argument.
pub(crate) fn automatic_positions(desc: &CallableDesc) -> Vec<bool> {
    let n = desc.args.len();
    let mut automatic = vec![false; n];

    for arg in &desc.args {
        match &arg.ty {
            TypeDesc::Array(a) => {
                if let ArrayLength::Arg(pos) = a.length {
                    if pos < n {
                        automatic[pos] = true;
                    }
                }
            }
            TypeDesc::Callback(_) => {
                if let Some(pos) = arg.destroy_pos {
                    if pos < n {
                        automatic[pos] = true;
                    }
                }
            }
            _ => {}
        }
    }

    if let TypeDesc::Array(a) = &desc.ret.ty {
        if let ArrayLength::Arg(pos) = a.length {
            if desc
                .args
                .get(pos)
                .map(|arg| arg.direction == Direction::Out)
                .unwrap_or(false)
            {
                automatic[pos] = true;
            }
        }
    }

    automatic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ArgDesc, ArrayDesc, CallableKind, ScopePolicy, Transfer};

    fn array_of_i32(length: ArrayLength) -> TypeDesc {
        TypeDesc::Array(ArrayDesc::new(TypeDesc::I32, length))
    }

    #[test]
    fn array_length_positions_are_automatic() {
        let desc = CallableDesc::new("sum", CallableKind::Function)
            .arg(ArgDesc::new("values", array_of_i32(ArrayLength::Arg(1))))
            .arg(ArgDesc::new("n", TypeDesc::U64))
            .returns(TypeDesc::I32, Transfer::None);
        assert_eq!(automatic_positions(&desc), vec![false, true]);
    }

    #[test]
    fn destroy_notify_positions_are_automatic() {
        let desc = CallableDesc::new("watch", CallableKind::Function)
            .arg(
                ArgDesc::new("cb", TypeDesc::Callback(CallableId(0))).callback_positions(
                    Some(1),
                    Some(2),
                    ScopePolicy::Notified,
                ),
            )
            .arg(ArgDesc::new("data", TypeDesc::Void).user_data_at(1))
            .arg(ArgDesc::new("notify", TypeDesc::Callback(CallableId(1))));
        assert_eq!(automatic_positions(&desc), vec![false, false, true]);
    }

    #[test]
    fn out_length_of_returned_array_is_automatic() {
        let desc = CallableDesc::new("dup", CallableKind::Function)
            .arg(ArgDesc::new("n", TypeDesc::U64).out())
            .returns(array_of_i32(ArrayLength::Arg(0)), Transfer::Full);
        assert_eq!(automatic_positions(&desc), vec![true]);
    }
}
