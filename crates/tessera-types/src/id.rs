//! Dispatch identifiers for type constructors.

use serde::{Deserialize, Serialize};

/// Identifier of a type's outermost constructor.
///
/// `TypeId` is the key material for multiple dispatch: a dispatch table maps
/// tuples of `TypeId`s to concrete callables. It deliberately carries no
/// structure — `Tuple(i32, f64)` and `Tuple(string)` share [`TypeId::TUPLE`],
/// and an overload registered under that id is responsible for inspecting the
/// full [`DataType`](crate::DataType) during its own resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(u16);

impl TypeId {
    pub const BOOL: TypeId = TypeId(0);
    pub const INT32: TypeId = TypeId(1);
    pub const INT64: TypeId = TypeId(2);
    pub const FLOAT32: TypeId = TypeId(3);
    pub const FLOAT64: TypeId = TypeId(4);
    pub const STRING: TypeId = TypeId(5);
    pub const TUPLE: TypeId = TypeId(6);
    pub const OPTION: TypeId = TypeId(7);
    pub const VAR: TypeId = TypeId(8);
    pub const ANY: TypeId = TypeId(9);

    /// Raw index, usable for table sizing.
    pub fn index(self) -> u16 {
        self.0
    }

    /// Check if this id names a fixed-width numeric constructor.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeId::INT32 | TypeId::INT64 | TypeId::FLOAT32 | TypeId::FLOAT64
        )
    }

    /// Check if this id names a symbolic constructor.
    pub fn is_symbolic(self) -> bool {
        matches!(self, TypeId::VAR | TypeId::ANY)
    }

    /// Human-readable constructor name.
    pub fn name(self) -> &'static str {
        match self {
            TypeId::BOOL => "bool",
            TypeId::INT32 => "int32",
            TypeId::INT64 => "int64",
            TypeId::FLOAT32 => "float32",
            TypeId::FLOAT64 => "float64",
            TypeId::STRING => "string",
            TypeId::TUPLE => "tuple",
            TypeId::OPTION => "option",
            TypeId::VAR => "var",
            TypeId::ANY => "any",
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(TypeId::INT32.is_numeric());
        assert!(!TypeId::STRING.is_numeric());
        assert!(TypeId::VAR.is_symbolic());
        assert!(!TypeId::TUPLE.is_symbolic());
    }

    #[test]
    fn test_names() {
        assert_eq!(TypeId::FLOAT64.name(), "float64");
        assert_eq!(TypeId::OPTION.to_string(), "option");
    }
}
