//! Error types for value marshaling.

use thiserror::Error;

/// Errors that can occur while converting between host values and native
/// slots. None of these are retried; each aborts the current invocation.
#[derive(Error, Debug)]
pub enum MarshalError {
    /// A required argument was absent and the slot is not nullable.
    #[error("undefined value for mandatory argument '{name}'")]
    MissingValue { name: String },

    /// The descriptor names a shape the engine does not implement. Always
    /// fatal: it signals an engine gap, not a user error.
    #[error("unhandled type tag {tag} in {context}")]
    UnhandledTag {
        tag: &'static str,
        context: &'static str,
    },

    /// A record, enum, class, or callable id did not resolve in the catalog.
    #[error("descriptor names unresolvable {kind} identity")]
    UnresolvableType { kind: &'static str },

    /// An enum value had no resolvable native identity.
    #[error("could not handle unknown enum value '{value}' for {name}")]
    UnknownEnumType { name: String, value: String },

    /// A record has no field with the requested name.
    #[error("record '{record}' has no field '{field}'")]
    UnknownField { record: String, field: String },

    /// An array's element count could not be determined.
    #[error("could not determine the length of the array")]
    LengthIndeterminate,

    /// A callback-typed argument received a defined non-callable value.
    #[error("value for callback argument '{name}' is not callable")]
    NotACallable { name: String },

    /// Invalid UTF-8 in a native string with the owned-text tag.
    #[error("invalid UTF-8 in native string")]
    InvalidUtf8,

    /// Host value shape does not fit the slot's type.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },
}
