//! The wrapper registry collaborator.
//!
//! Bidirectional exchange between host wrapper objects and native handles
//! for object and boxed types, with transfer-aware reference and copy
//! handling. Wrappers own at most one native reference and release it when
//! the last host-side clone is dropped.

use std::ffi::c_void;
use std::sync::Arc;

use crate::descriptor::{Catalog, ClassId, RecordId, Transfer};
use crate::logging::warn;
use crate::marshal::MarshalError;
use crate::value::HostValue;

/// What kind of native type a wrapper stands for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WrapperIdent {
    Class(ClassId),
    Record(RecordId),
}

/// How a wrapper releases the native value it owns.
#[derive(Copy, Clone, Debug)]
enum ReleaseHook {
    /// Borrowed; nothing to release.
    None,
    /// Drop one object reference.
    Unref(unsafe extern "C" fn(*mut c_void)),
    /// Free through the boxed type's hook.
    BoxedFree(unsafe extern "C" fn(*mut c_void)),
    /// Plain allocator release.
    Malloc,
}

struct WrapperCore {
    raw: *mut c_void,
    ident: WrapperIdent,
    release: ReleaseHook,
}

// The raw pointer is only touched through the registry and the release
// hook; the wrapper itself carries no interior mutability.
unsafe impl Send for WrapperCore {}
unsafe impl Sync for WrapperCore {}

impl Drop for WrapperCore {
    fn drop(&mut self) {
        match self.release {
            ReleaseHook::None => {}
            ReleaseHook::Unref(f) | ReleaseHook::BoxedFree(f) => unsafe { f(self.raw) },
            ReleaseHook::Malloc => unsafe { crate::native::release(self.raw) },
        }
    }
}

/// Host wrapper around a native object or boxed handle.
#[derive(Clone)]
pub struct ObjectHandle(Arc<WrapperCore>);

impl ObjectHandle {
    /// The wrapped native pointer.
    pub fn raw(&self) -> *mut c_void {
        self.0.raw
    }

    pub fn ident(&self) -> WrapperIdent {
        self.0.ident
    }

    /// Whether this is the only live host-side handle.
    pub(crate) fn is_last_handle(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }

    /// Whether the wrapper owns a native reference.
    pub(crate) fn owns_reference(&self) -> bool {
        !matches!(self.0.release, ReleaseHook::None)
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.raw == other.0.raw && self.0.ident == other.0.ident
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectHandle({:?} @ {:p})", self.0.ident, self.0.raw)
    }
}

/// Registry mediating wrapper/handle exchange against the catalog's class
/// and record descriptors.
pub struct WrapperRegistry {
    catalog: Arc<Catalog>,
}

impl WrapperRegistry {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Wrap a native object pointer. `own` means the caller hands us an
    /// existing reference; otherwise the wrapper acquires its own through
    /// the class ref hook. Null wraps to undef.
    pub fn wrap_object(&self, raw: *mut c_void, class: ClassId, own: bool) -> HostValue {
        if raw.is_null() {
            return HostValue::Undef;
        }
        let Some(desc) = self.catalog.class(class) else {
            return HostValue::Undef;
        };
        if !own {
            if let Some(ref_fn) = desc.ref_fn {
                unsafe {
                    ref_fn(raw);
                }
            }
        }
        let release = match desc.unref_fn {
            Some(f) => ReleaseHook::Unref(f),
            None => ReleaseHook::None,
        };
        HostValue::Object(ObjectHandle(Arc::new(WrapperCore {
            raw,
            ident: WrapperIdent::Class(class),
            release,
        })))
    }

    /// Wrap a native record pointer. When `own` is set the wrapper frees the
    /// value (boxed hook when registered, plain release otherwise).
    pub fn wrap_record(&self, raw: *mut c_void, record: RecordId, own: bool) -> HostValue {
        if raw.is_null() {
            return HostValue::Undef;
        }
        let release = if own {
            match self.catalog.record(record).and_then(|r| r.boxed) {
                Some(ops) => ReleaseHook::BoxedFree(ops.free),
                None => ReleaseHook::Malloc,
            }
        } else {
            ReleaseHook::None
        };
        HostValue::Object(ObjectHandle(Arc::new(WrapperCore {
            raw,
            ident: WrapperIdent::Record(record),
            release,
        })))
    }

    /// Unwrap an object-typed host value to its native pointer.
    pub fn unwrap_object(
        &self,
        value: &HostValue,
        class: ClassId,
    ) -> Result<*mut c_void, MarshalError> {
        match value {
            HostValue::Object(h) => match h.ident() {
                WrapperIdent::Class(_) => Ok(h.raw()),
                WrapperIdent::Record(_) => Err(MarshalError::TypeMismatch {
                    expected: self.class_name(class),
                    got: "boxed record wrapper".to_string(),
                }),
            },
            other => Err(MarshalError::TypeMismatch {
                expected: self.class_name(class),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Unwrap a record-typed host value to its native pointer.
    pub fn unwrap_record(
        &self,
        value: &HostValue,
        record: RecordId,
    ) -> Result<*mut c_void, MarshalError> {
        match value {
            HostValue::Object(h) => Ok(h.raw()),
            other => Err(MarshalError::TypeMismatch {
                expected: self
                    .catalog
                    .record(record)
                    .map(|r| r.name.clone())
                    .unwrap_or_else(|| "record".to_string()),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Adjust an outgoing object reference for the requested transfer.
    ///
    /// Returns the effective transfer: when a no-transfer handoff would leave
    /// the native side holding a pointer whose only reference is about to
    /// die with the last host wrapper, the handoff is upgraded to a full
    /// transfer and an extra reference is taken.
    pub fn adjust_object_ref(
        &self,
        handle: &ObjectHandle,
        class: ClassId,
        transfer: Transfer,
    ) -> Transfer {
        let Some(desc) = self.catalog.class(class) else {
            return transfer;
        };
        let mut transfer = transfer;
        if transfer == Transfer::None
            && handle.is_last_handle()
            && handle.owns_reference()
        {
            let native_refs = desc
                .ref_count_fn
                .map(|f| unsafe { f(handle.raw()) })
                .unwrap_or(usize::MAX);
            if native_refs == 1 {
                warn!(
                    class = %desc.name,
                    "handing out object without ownership transfer, but it is about \
                     to be destroyed; adding a reference for safety"
                );
                transfer = Transfer::Full;
            }
        }
        if transfer >= Transfer::Container {
            if let Some(ref_fn) = desc.ref_fn {
                unsafe {
                    ref_fn(handle.raw());
                }
            }
        }
        transfer
    }

    fn class_name(&self, class: ClassId) -> String {
        self.catalog
            .class(class)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "object".to_string())
    }
}
