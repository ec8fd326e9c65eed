//! Runtime bridge for invoking native callables described by reflective
//! interface descriptors.
//!
//! A dynamically-typed host supplies ordered argument lists; the engine
//! builds a native call frame purely from the callable's runtime descriptor
//! — argument directions, type shapes, ownership-transfer annotations,
//! automatic companion positions — executes the call through libffi, and
//! marshals results back. In the other direction, host callables become
//! generated native code pointers that native code invokes like ordinary
//! function pointers.
//!
//! # Quick Start
//!
//! ```ignore
//! use nid_bridge::prelude::*;
//!
//! // Describe a native callable: (in i32 a, out i32 b) -> void
//! let mut catalog = Catalog::new();
//! let id = catalog.add_callable(
//!     CallableDesc::new("double_into", CallableKind::Function)
//!         .arg(ArgDesc::new("a", TypeDesc::I32))
//!         .arg(ArgDesc::new("b", TypeDesc::I32).out())
//!         .address(double_into as usize),
//! );
//!
//! // Invoke it with host values
//! let bridge = Bridge::new(Arc::new(catalog), Arc::new(BasicRuntime::new()));
//! let results = bridge.call(id, &[HostValue::Int(5)])?;
//! assert_eq!(results, vec![HostValue::Int(10)]);
//! ```
//!
//! # Modules
//!
//! - [`descriptor`] - Runtime type/callable descriptors and the catalog
//! - [`value`] - Dynamically-typed host values and host callables
//! - [`marshal`] - Bidirectional value marshaling
//! - [`closure`] - Callback trampolines and their registry
//! - [`invoke`] - The forward frame builder and reverse trampoline engine
//! - [`fields`] - Record field access through the marshaler
//! - [`native`] - Native-side memory model (chains, value boxes, errors)
//! - [`loader`] - Shared-library symbol resolution (requires `loader`)
//!
//! # Feature Flags
//!
//! - `loader` - Shared-library symbol resolution (enabled by default)
//! - `logging` - Library-level tracing (consumers provide their own
//!   subscriber)
//! - `full` - Enable all features

pub mod closure;
pub mod descriptor;
pub mod fields;
pub mod invoke;
#[cfg(feature = "loader")]
pub mod loader;
mod logging;
pub mod marshal;
pub mod native;
pub mod prelude;
pub mod registry;
pub mod runtime;
pub mod value;

mod error;

// Re-export the unified error type
pub use error::{Error, Result};

// Re-export the engine surface at the crate root for convenience
pub use closure::{ClosureError, Trampoline, install_overrides, make_closure, trampoline_release};
pub use descriptor::{
    ArgDesc, ArrayDesc, ArrayLength, BoxedOps, CallableDesc, CallableId, CallableKind, Catalog,
    ClassDesc, ClassId, ContainerRef, Direction, EnumDesc, EnumId, FieldDesc, RecordDesc,
    RecordId, RetDesc, ScopePolicy, Transfer, TypeDesc, WellKnown,
};
pub use invoke::{Bridge, InvokeError};
pub use marshal::{MarshalError, NativeSlot, native_to_value, value_to_native};
pub use native::{ListNode, MapNode, RaisedError, ValueBox};
pub use registry::{ObjectHandle, WrapperIdent, WrapperRegistry};
pub use runtime::{BasicRuntime, HostRuntime};
pub use value::{HostCallable, HostFn, HostValue};

#[cfg(feature = "loader")]
pub use loader::SymbolSource;
