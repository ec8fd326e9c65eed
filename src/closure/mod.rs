//! Callback trampolines and their registry.
//!
//! A [`Trampoline`] binds a generated native code pointer to a host
//! callable: native code calls the code pointer, the entry demarshals the
//! native arguments and dispatches into the host (see
//! [`crate::invoke::reverse`]). Trampolines live in a process-lifetime
//! table keyed by a correlation handle — the same handle that travels in
//! the callback's native user-data slot — and are released according to
//! their scope policy: call-scoped by the enclosing invocation frame,
//! notified-scoped by the installed destroy-notify entry, async-scoped only
//! explicitly (a documented leak when never released).
//!
//! The table is the one piece of cross-call shared state in the engine and
//! guards against double release: releasing an already-released key is a
//! logged no-op.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use libffi::low;
use libffi::middle::{Cif, Type};
use thiserror::Error;

use crate::descriptor::{CallableDesc, RecordId, ScopePolicy, TypeDesc};
use crate::error::Result;
use crate::invoke::Bridge;
use crate::logging::{debug, error, trace, warn};
use crate::marshal::{self, MarshalError, NativeSlot};
use crate::value::HostCallable;
use crate::value::HostValue;

/// Errors raised while creating or releasing trampolines.
#[derive(Error, Debug)]
pub enum ClosureError {
    /// The platform could not allocate closure memory.
    #[error("could not allocate a native closure")]
    ClosureAllocFailed,

    /// The callback's ABI description could not be built.
    #[error("could not prepare closure call interface for '{name}'")]
    PrepFailed { name: String },

    /// A closure-container record has no associated callable signature.
    #[error("record '{name}' has no closure signature")]
    NoClosureSignature { name: String },
}

fn live_table() -> &'static Mutex<HashMap<u64, Arc<Trampoline>>> {
    static LIVE: OnceLock<Mutex<HashMap<u64, Arc<Trampoline>>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn next_key() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// An owning wrapper around one generated native-callable entry point.
pub struct Trampoline {
    key: u64,
    bridge: Bridge,
    signature: Arc<CallableDesc>,
    /// Kept alive for the lifetime of the closure; libffi reads it on
    /// every incoming call.
    cif: Option<Cif>,
    closure: *mut low::ffi_closure,
    code: *mut c_void,
    callable: Option<HostCallable>,
    user_data: Mutex<Option<HostValue>>,
    data_pos: Option<usize>,
    notify_pos: Option<usize>,
    scope: ScopePolicy,
}

// The cif and closure pointers are written once at creation and read-only
// afterwards; the user-data cell is mutex-guarded.
unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

impl Trampoline {
    /// Correlation handle; also the value placed in the callback's native
    /// user-data slot.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Generated native entry point, or null when the host supplied no
    /// callable at all.
    pub fn code_ptr(&self) -> *mut c_void {
        self.code
    }

    pub fn signature(&self) -> &Arc<CallableDesc> {
        &self.signature
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub(crate) fn callable(&self) -> Option<&HostCallable> {
        self.callable.as_ref()
    }

    pub fn data_pos(&self) -> Option<usize> {
        self.data_pos
    }

    pub fn notify_pos(&self) -> Option<usize> {
        self.notify_pos
    }

    pub fn scope(&self) -> ScopePolicy {
        self.scope
    }

    /// Attach the host-side user data travelling with this callback.
    pub fn attach_user_data(&self, value: HostValue) {
        if let Ok(mut cell) = self.user_data.lock() {
            *cell = Some(value);
        }
    }

    pub fn user_data(&self) -> Option<HostValue> {
        self.user_data.lock().ok().and_then(|cell| cell.clone())
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        if !self.closure.is_null() {
            unsafe { low::closure_free(self.closure) };
        }
    }
}

/// The generated entry every trampoline shares: demarshal, dispatch into
/// the host, marshal results back. Failures cannot unwind into native code;
/// they are logged and the return slot stays zeroed.
unsafe extern "C" fn trampoline_entry(
    _cif: &low::ffi_cif,
    result: &mut NativeSlot,
    args: *const *const c_void,
    userdata: &Trampoline,
) {
    // Hold an owning reference for the duration of the nested invocation.
    let Some(tramp) = lookup(userdata.key) else {
        error!(key = userdata.key, "native code invoked a released trampoline");
        *result = NativeSlot::zeroed();
        return;
    };
    *result = NativeSlot::zeroed();
    if let Err(err) = crate::invoke::reverse::invoke_host(&tramp, args, result) {
        error!(callback = %tramp.signature.name, %err, "reverse invocation failed");
        *result = NativeSlot::zeroed();
    }
}

/// The canonical destroy-notify entry point. Native code passes back the
/// user-data correlation handle; the matching trampoline is released. Safe
/// against stale and repeated notifications.
pub unsafe extern "C" fn trampoline_release(data: *mut c_void) {
    let key = data as usize as u64;
    if !release(key) {
        warn!(key, "destroy notification for unknown or already-released trampoline");
    }
}

/// The destroy-notify entry as a native pointer value.
pub(crate) fn release_entry_ptr() -> *mut c_void {
    trampoline_release as usize as *mut c_void
}

/// Create a trampoline for `signature` wrapping `callable` and register it
/// under the given scope policy. A `None` callable registers positions only
/// (the host passed nothing): no closure is generated and the code pointer
/// stays null, so the paired notify slot is later filled with null too.
pub(crate) fn create(
    bridge: Bridge,
    signature: Arc<CallableDesc>,
    callable: Option<HostCallable>,
    data_pos: Option<usize>,
    notify_pos: Option<usize>,
    scope: ScopePolicy,
) -> Result<Arc<Trampoline>> {
    let key = next_key();

    let cif = if callable.is_some() {
        Some(build_cif(&bridge, &signature)?)
    } else {
        None
    };

    let (closure, code) = match &cif {
        Some(_) => {
            let (closure, code) = low::closure_alloc();
            if closure.is_null() {
                return Err(ClosureError::ClosureAllocFailed.into());
            }
            (closure, code.0)
        }
        None => (std::ptr::null_mut(), std::ptr::null_mut()),
    };

    let tramp = Arc::new(Trampoline {
        key,
        bridge,
        signature,
        cif,
        closure,
        code,
        callable,
        user_data: Mutex::new(None),
        data_pos,
        notify_pos,
        scope,
    });

    if let Some(cif) = &tramp.cif {
        let prepped = unsafe {
            low::prep_closure(
                closure,
                cif.as_raw_ptr(),
                trampoline_entry,
                Arc::as_ptr(&tramp),
                low::CodePtr(code),
            )
        };
        if prepped.is_err() {
            return Err(ClosureError::PrepFailed {
                name: tramp.signature.name.clone(),
            }
            .into());
        }
    }

    debug!(
        key,
        callback = %tramp.signature.name,
        scope = ?scope,
        has_code = !code.is_null(),
        "registered callback trampoline"
    );

    if let Ok(mut live) = live_table().lock() {
        live.insert(key, Arc::clone(&tramp));
    }
    Ok(tramp)
}

fn build_cif(bridge: &Bridge, signature: &CallableDesc) -> Result<Cif> {
    let catalog = bridge.catalog();
    let mut args = Vec::with_capacity(signature.args.len());
    for arg in &signature.args {
        let ty = match arg.direction {
            crate::descriptor::Direction::In => marshal::ffi_type_of(&arg.ty, catalog),
            // Out and inout arguments arrive as pointers to storage.
            _ => Some(Type::pointer()),
        };
        args.push(ty.ok_or(MarshalError::UnresolvableType { kind: "enum" })?);
    }
    let ret = marshal::ffi_return_type(&signature.ret.ty, catalog)
        .ok_or(MarshalError::UnresolvableType { kind: "enum" })?;
    Ok(Cif::new(args, ret))
}

/// Create a standalone trampoline for a catalog callback signature.
///
/// For callables native code stores and invokes outside any single call
/// (class-struct slots, closure containers built by hand). The trampoline
/// has unbounded scope: it lives until [`release`] is called with its key.
pub fn make_closure(
    bridge: &Bridge,
    signature: crate::descriptor::CallableId,
    callable: HostCallable,
) -> Result<Arc<Trampoline>> {
    let sig = bridge
        .catalog()
        .callable(signature)
        .ok_or(MarshalError::UnresolvableType { kind: "callable" })?
        .clone();
    create(
        bridge.clone(),
        sig,
        Some(callable),
        None,
        None,
        ScopePolicy::Async,
    )
}

/// Look up a live trampoline by correlation handle.
pub(crate) fn lookup(key: u64) -> Option<Arc<Trampoline>> {
    live_table().lock().ok().and_then(|live| live.get(&key).cloned())
}

/// Release a trampoline: drop it from the live table, freeing the generated
/// code and the held host references. Returns whether the key was live.
pub fn release(key: u64) -> bool {
    let removed = live_table()
        .lock()
        .ok()
        .and_then(|mut live| live.remove(&key));
    match removed {
        Some(tramp) => {
            trace!(key, scope = ?tramp.scope, "released trampoline");
            drop(tramp);
            true
        }
        None => false,
    }
}

/// Number of currently live trampolines, across all scopes.
pub fn live_count() -> usize {
    live_table().lock().map(|live| live.len()).unwrap_or(0)
}

/// Install virtual-method overrides into a native class struct.
///
/// `impls` pairs a callback-typed field of the class-struct record with the
/// host method name implementing it. Each provided override gets an
/// unbounded trampoline whose code pointer is written at the field's
/// offset; fields without a provided implementation are left untouched.
/// Returns the number of slots written.
///
/// # Safety
/// `class_mem` must point to a writable class struct of the record's size.
pub unsafe fn install_overrides(
    bridge: &Bridge,
    class_record: RecordId,
    class_mem: *mut c_void,
    impls: &[(&str, &str)],
) -> Result<usize> {
    let record = bridge
        .catalog()
        .record(class_record)
        .ok_or(MarshalError::UnresolvableType { kind: "record" })?;

    let mut installed = 0;
    for (field_name, method_name) in impls {
        let field = record
            .fields
            .iter()
            .find(|f| f.name == *field_name)
            .ok_or_else(|| MarshalError::UnknownField {
                record: record.name.clone(),
                field: field_name.to_string(),
            })?;
        let TypeDesc::Callback(sig_id) = &field.ty else {
            return Err(MarshalError::TypeMismatch {
                expected: "callback-typed class-struct field".to_string(),
                got: format!("{:?}", field.ty),
            }
            .into());
        };
        let signature = bridge
            .catalog()
            .callable(*sig_id)
            .ok_or(MarshalError::UnresolvableType { kind: "callable" })?
            .clone();

        let tramp = create(
            bridge.clone(),
            signature,
            Some(HostCallable::Method(method_name.to_string())),
            None,
            None,
            ScopePolicy::Async,
        )?;
        debug!(
            field = %field_name,
            method = %method_name,
            offset = field.offset,
            "installing virtual-method override"
        );
        unsafe {
            *(class_mem.add(field.offset) as *mut *mut c_void) = tramp.code_ptr();
        }
        installed += 1;
    }
    Ok(installed)
}
