//! Resolution and instantiation errors.
//!
//! Resolve-time errors abort the whole top-level call before any kernel is
//! emitted; the partial call graph is discarded, never partially
//! instantiated. Instantiate-time errors indicate a defect (the two phases
//! disagreed about frame layout) rather than user error, and also abort.
//! Nothing in this crate retries; picking a different overload is a
//! decision for layers above.

use thiserror::Error;

use tessera_types::SignatureError;

/// Callable result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving or instantiating a call.
#[derive(Debug, Error)]
pub enum Error {
    /// Source types do not satisfy a callable's signature or pattern.
    #[error("type mismatch in `{callable}`: {message}")]
    TypeMismatch {
        /// The callable that rejected the call.
        callable: String,
        /// What failed to match.
        message: String,
    },

    /// A dispatch table has no overload for the requested type identifiers.
    #[error("no matching overload for `{callable}` over ({types})")]
    NoOverload {
        /// The dispatching callable.
        callable: String,
        /// The looked-up type identifiers.
        types: String,
    },

    /// A second overload was registered under an existing dispatch key.
    ///
    /// Tables are write-once: later inserts for an existing key are
    /// rejected, never treated as overrides.
    #[error("duplicate overload for `{callable}` over ({types})")]
    DuplicateOverload {
        /// The dispatching callable.
        callable: String,
        /// The already-registered type identifiers.
        types: String,
    },

    /// A fixed-arity composition was given an operand count it cannot
    /// handle.
    #[error("`{callable}` cannot handle {actual} operands (limit {limit})")]
    UnsupportedArity {
        /// The composition that rejected the call.
        callable: String,
        /// The offered operand count.
        actual: usize,
        /// The supported maximum.
        limit: usize,
    },

    /// A frame-layout invariant between the resolve and instantiate phases
    /// was violated. This is an implementation bug, not user error.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

impl Error {
    pub(crate) fn invalid_layout(message: impl Into<String>) -> Error {
        Error::InvalidLayout(message.into())
    }

    pub(crate) fn type_mismatch(callable: &str, message: impl Into<String>) -> Error {
        Error::TypeMismatch {
            callable: callable.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn signature(callable: &str, err: SignatureError) -> Error {
        Error::TypeMismatch {
            callable: callable.to_string(),
            message: err.to_string(),
        }
    }
}
