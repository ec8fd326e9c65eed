//! Error types for forward and reverse invocation.

use thiserror::Error;

use crate::marshal::MarshalError;

/// Errors raised while building, executing, or unwinding an invocation.
#[derive(Error, Debug)]
pub enum InvokeError {
    /// No registration claimed an automatic argument position. Always
    /// fatal: the descriptor has a shape the engine does not understand.
    #[error("could not handle automatic argument at position {pos}")]
    UnhandledAutomaticArgument { pos: usize },

    /// The native ABI call frame could not be built; nothing was executed.
    #[error("could not prepare a call interface: {reason}")]
    CallFrameConstructionError { reason: String },

    /// The callable signaled failure through its native error slot.
    #[error("native error {code}: {message}")]
    NativeReportedError { code: i32, message: String },

    /// A reverse invocation's host callable returned the wrong number of
    /// values.
    #[error("callback returned {got} values but is supposed to return {expected} values")]
    ResultArityMismatch { expected: usize, got: usize },

    /// A method or constructor was invoked without a usable receiver.
    #[error("missing or invalid receiver for '{name}'")]
    MissingReceiver { name: String },

    /// The callable descriptor has no resolved native address.
    #[error("callable '{name}' has no resolved native address")]
    UnresolvedAddress { name: String },

    /// The host callable itself failed.
    #[error("host callable failed: {0}")]
    HostCallableFailed(#[source] anyhow::Error),

    /// Argument or result marshaling failed.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
}
