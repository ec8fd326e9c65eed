//! Convenient re-exports for common usage patterns.
//!
//! This module provides a single import to bring all commonly used types
//! into scope.
//!
//! # Example
//!
//! ```ignore
//! use nid_bridge::prelude::*;
//!
//! let bridge = Bridge::new(Arc::new(catalog), Arc::new(BasicRuntime::new()));
//! let results = bridge.call(id, &[HostValue::Int(5)])?;
//! ```

// Unified error handling
pub use crate::error::{Error, Result};

// Descriptor model
pub use crate::descriptor::{
    ArgDesc, ArrayDesc, ArrayLength, BoxedOps, CallableDesc, CallableId, CallableKind, Catalog,
    ClassDesc, ClassId, ContainerRef, Direction, EnumDesc, EnumId, RecordDesc, RecordId, RetDesc,
    ScopePolicy, Transfer, TypeDesc, WellKnown,
};

// Engine entry points
pub use crate::invoke::{Bridge, InvokeError};

// Host values and runtime
pub use crate::runtime::{BasicRuntime, HostRuntime};
pub use crate::value::{HostCallable, HostFn, HostValue};

// Marshaling surface
pub use crate::marshal::{MarshalError, NativeSlot, native_to_value, value_to_native};

// Wrapper and trampoline surfaces
pub use crate::closure::{Trampoline, install_overrides, make_closure};
pub use crate::registry::{ObjectHandle, WrapperRegistry};

// Symbol resolution (requires "loader" feature)
#[cfg(feature = "loader")]
pub use crate::loader::SymbolSource;
