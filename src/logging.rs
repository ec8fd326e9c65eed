//! Conditional logging macros for library-level tracing.
//!
//! When the `logging` feature is enabled, these macros forward to tracing.
//! When disabled, they compile to no-ops with zero runtime cost.
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::logging::{debug, trace};
//!
//! trace!(pos = i, tag = ?arg.ty, "marshaling argument");
//! debug!(name = %desc.name, "invoking callable");
//! ```

/// Emit a trace-level log (per-argument marshaling detail).
#[cfg(feature = "logging")]
macro_rules! log_trace {
    ($($arg:tt)*) => { tracing::trace!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_trace {
    ($($arg:tt)*) => {};
}

/// Emit a debug-level log (invocation lifecycle events).
#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

/// Emit a warn-level log (unexpected but handled situations).
#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => { tracing::warn!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

/// Emit an error-level log (failures that will propagate as errors).
#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => { tracing::error!($($arg)*) }
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {};
}

pub(crate) use log_debug as debug;
pub(crate) use log_error as error;
pub(crate) use log_trace as trace;
pub(crate) use log_warn as warn;
