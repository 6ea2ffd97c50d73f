//! Callable signatures.

use thiserror::Error;

use crate::datatype::{DataType, TypeBindings};

/// Errors raised while matching a signature against actual source types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Wrong number of source operands.
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    /// A source operand failed to match its parameter pattern.
    #[error("argument {position} has type {actual}, expected {expected}")]
    Mismatch {
        position: usize,
        expected: DataType,
        actual: DataType,
    },
}

/// The argument/return type contract of a callable.
///
/// Parameters may be symbolic; resolving a call matches each actual source
/// type against its parameter pattern (accumulating variable bindings) and
/// substitutes the bindings into the return type.
///
/// # Example
///
/// ```
/// use tessera_types::{DataType, Signature, TypeBindings};
///
/// let sig = Signature::new(vec![DataType::var("T"), DataType::var("T")], DataType::var("T"));
/// let mut bindings = TypeBindings::new();
/// let ret = sig
///     .resolve_call(&[DataType::Float64, DataType::Float64], &mut bindings)
///     .unwrap();
/// assert_eq!(ret, DataType::Float64);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    params: Vec<DataType>,
    ret: DataType,
}

impl Signature {
    pub fn new(params: Vec<DataType>, ret: DataType) -> Signature {
        Signature { params, ret }
    }

    pub fn params(&self) -> &[DataType] {
        &self.params
    }

    pub fn ret(&self) -> &DataType {
        &self.ret
    }

    /// Number of source operands the signature accepts.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Match actual source types and produce the concrete return type.
    pub fn resolve_call(
        &self,
        src: &[DataType],
        bindings: &mut TypeBindings,
    ) -> Result<DataType, SignatureError> {
        if src.len() != self.params.len() {
            return Err(SignatureError::Arity {
                expected: self.params.len(),
                actual: src.len(),
            });
        }
        for (position, (param, actual)) in self.params.iter().zip(src).enumerate() {
            if !param.matches(actual, bindings) {
                return Err(SignatureError::Mismatch {
                    position,
                    expected: param.clone(),
                    actual: actual.clone(),
                });
            }
        }
        Ok(self.ret.substitute(bindings))
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_concrete() {
        let sig = Signature::new(vec![DataType::Int32, DataType::Int32], DataType::Int32);
        let mut bindings = TypeBindings::new();
        let ret = sig
            .resolve_call(&[DataType::Int32, DataType::Int32], &mut bindings)
            .unwrap();
        assert_eq!(ret, DataType::Int32);
    }

    #[test]
    fn test_resolve_binds_return() {
        let sig = Signature::new(vec![DataType::var("T")], DataType::option(DataType::var("T")));
        let mut bindings = TypeBindings::new();
        let ret = sig.resolve_call(&[DataType::String], &mut bindings).unwrap();
        assert_eq!(ret, DataType::option(DataType::String));
    }

    #[test]
    fn test_arity_error() {
        let sig = Signature::new(vec![DataType::Int32], DataType::Int32);
        let mut bindings = TypeBindings::new();
        let err = sig.resolve_call(&[], &mut bindings).unwrap_err();
        assert_eq!(
            err,
            SignatureError::Arity {
                expected: 1,
                actual: 0
            }
        );
    }

    #[test]
    fn test_conflicting_binding_reports_position() {
        let sig = Signature::new(vec![DataType::var("T"), DataType::var("T")], DataType::var("T"));
        let mut bindings = TypeBindings::new();
        let err = sig
            .resolve_call(&[DataType::Int32, DataType::Float64], &mut bindings)
            .unwrap_err();
        match err {
            SignatureError::Mismatch { position, .. } => assert_eq!(position, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_display() {
        let sig = Signature::new(vec![DataType::var("T"), DataType::var("T")], DataType::Bool);
        assert_eq!(sig.to_string(), "(T, T) -> bool");
    }
}
