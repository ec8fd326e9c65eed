//! Unified error type for the crate.
//!
//! Each subsystem defines its own error enum; this module wraps them into a
//! single [`Error`] so callers can use one `Result` alias across the API.

use thiserror::Error;

use crate::closure::ClosureError;
use crate::invoke::InvokeError;
use crate::marshal::MarshalError;

/// Unified error type wrapping all subsystem errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Value marshaling failed.
    #[error(transparent)]
    Marshal(#[from] MarshalError),

    /// Invocation failed (forward or reverse).
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// Trampoline creation or release failed.
    #[error(transparent)]
    Closure(#[from] ClosureError),

    /// Shared-library loading or symbol resolution failed.
    #[cfg(feature = "loader")]
    #[error(transparent)]
    Loader(#[from] libloading::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
