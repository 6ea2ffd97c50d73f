//! The dynamic type value and structural matching.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::TypeId;
use crate::layout::{tuple_layout, StringView, TypeLayout};

/// Named type-variable bindings accumulated during a resolution pass.
///
/// Bindings are inherited down a recursive resolve: once `T` is bound to
/// `int32` by an outer callable, every inner match of `T` must agree.
pub type TypeBindings = IndexMap<String, DataType>;

/// A dynamic type value.
///
/// A `DataType` is either concrete (it describes the exact in-memory layout
/// of an element) or symbolic (it still contains [`DataType::Var`] or
/// [`DataType::Any`] and must be matched against concrete types before any
/// kernel can be built for it).
///
/// # Example
///
/// ```
/// use tessera_types::{DataType, TypeBindings};
///
/// let pattern = DataType::Tuple(vec![DataType::var("T"), DataType::var("T")]);
/// let candidate = DataType::Tuple(vec![DataType::Int32, DataType::Int32]);
///
/// let mut bindings = TypeBindings::new();
/// assert!(pattern.matches(&candidate, &mut bindings));
/// assert_eq!(bindings["T"], DataType::Int32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean element, stored as one byte (0 or 1).
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// Borrowed byte-view string element ([`StringView`]).
    String,
    /// Nullable wrapper; the absent value is encoded in-band by sentinel.
    Option(Box<DataType>),
    /// Heterogeneous fixed-field record with C-struct layout.
    Tuple(Vec<DataType>),
    /// Named type variable; binds on first match.
    Var(String),
    /// Matches any concrete type without binding.
    Any,
}

impl DataType {
    /// Shorthand for a named type variable.
    pub fn var(name: &str) -> DataType {
        DataType::Var(name.to_string())
    }

    /// Shorthand for an option-wrapped type.
    pub fn option(inner: DataType) -> DataType {
        DataType::Option(Box::new(inner))
    }

    /// Dispatch identifier of the outermost constructor.
    pub fn type_id(&self) -> TypeId {
        match self {
            DataType::Bool => TypeId::BOOL,
            DataType::Int32 => TypeId::INT32,
            DataType::Int64 => TypeId::INT64,
            DataType::Float32 => TypeId::FLOAT32,
            DataType::Float64 => TypeId::FLOAT64,
            DataType::String => TypeId::STRING,
            DataType::Tuple(_) => TypeId::TUPLE,
            DataType::Option(_) => TypeId::OPTION,
            DataType::Var(_) => TypeId::VAR,
            DataType::Any => TypeId::ANY,
        }
    }

    /// True iff the type still contains a variable or wildcard anywhere.
    pub fn is_symbolic(&self) -> bool {
        match self {
            DataType::Var(_) | DataType::Any => true,
            DataType::Option(inner) => inner.is_symbolic(),
            DataType::Tuple(fields) => fields.iter().any(DataType::is_symbolic),
            _ => false,
        }
    }

    /// True iff the outermost constructor is `Option`.
    pub fn is_option(&self) -> bool {
        matches!(self, DataType::Option(_))
    }

    /// The value type of an option, or the type itself when not nullable.
    pub fn strip_option(&self) -> DataType {
        match self {
            DataType::Option(inner) => (**inner).clone(),
            other => other.clone(),
        }
    }

    /// Match this (possibly symbolic) pattern against a concrete candidate.
    ///
    /// `Var` binds the candidate on first sight and must equal its prior
    /// binding afterwards; `Any` matches without binding; `Option` and
    /// `Tuple` recurse structurally. On failure `bindings` may hold partial
    /// bindings from the prefix that did match — callers discard bindings
    /// when a resolution fails, so no rollback is performed here.
    pub fn matches(&self, candidate: &DataType, bindings: &mut TypeBindings) -> bool {
        match (self, candidate) {
            (DataType::Any, _) => true,
            (DataType::Var(name), _) => match bindings.get(name) {
                Some(bound) => bound == candidate,
                None => {
                    bindings.insert(name.clone(), candidate.clone());
                    true
                }
            },
            (DataType::Option(pattern), DataType::Option(inner)) => {
                pattern.matches(inner, bindings)
            }
            (DataType::Tuple(patterns), DataType::Tuple(fields)) => {
                patterns.len() == fields.len()
                    && patterns
                        .iter()
                        .zip(fields)
                        .all(|(p, c)| p.matches(c, bindings))
            }
            _ => self == candidate,
        }
    }

    /// Replace bound variables. Unbound variables survive; the caller
    /// decides whether a still-symbolic result is an error.
    pub fn substitute(&self, bindings: &TypeBindings) -> DataType {
        match self {
            DataType::Var(name) => bindings
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            DataType::Option(inner) => DataType::option(inner.substitute(bindings)),
            DataType::Tuple(fields) => {
                DataType::Tuple(fields.iter().map(|f| f.substitute(bindings)).collect())
            }
            other => other.clone(),
        }
    }

    /// Element byte layout, or `None` for symbolic types.
    ///
    /// An option has the layout of its value type: the absent value is a
    /// sentinel in the same storage, not a discriminant.
    pub fn layout(&self) -> Option<TypeLayout> {
        match self {
            DataType::Bool => Some(TypeLayout { size: 1, align: 1 }),
            DataType::Int32 | DataType::Float32 => Some(TypeLayout { size: 4, align: 4 }),
            DataType::Int64 | DataType::Float64 => Some(TypeLayout { size: 8, align: 8 }),
            DataType::String => Some(TypeLayout {
                size: std::mem::size_of::<StringView>(),
                align: std::mem::align_of::<StringView>(),
            }),
            DataType::Option(inner) => inner.layout(),
            DataType::Tuple(fields) => tuple_layout(fields).map(|(layout, _)| layout),
            DataType::Var(_) | DataType::Any => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Bool => f.write_str("bool"),
            DataType::Int32 => f.write_str("int32"),
            DataType::Int64 => f.write_str("int64"),
            DataType::Float32 => f.write_str("float32"),
            DataType::Float64 => f.write_str("float64"),
            DataType::String => f.write_str("string"),
            DataType::Option(inner) => write!(f, "?{inner}"),
            DataType::Tuple(fields) => {
                f.write_str("(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
            DataType::Var(name) => f.write_str(name),
            DataType::Any => f.write_str("Any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_binds_once() {
        let pattern = DataType::var("T");
        let mut bindings = TypeBindings::new();

        assert!(pattern.matches(&DataType::Int32, &mut bindings));
        assert_eq!(bindings["T"], DataType::Int32);

        // Same variable must agree with its prior binding.
        assert!(pattern.matches(&DataType::Int32, &mut bindings));
        assert!(!pattern.matches(&DataType::Float64, &mut bindings));
    }

    #[test]
    fn test_any_does_not_bind() {
        let mut bindings = TypeBindings::new();
        assert!(DataType::Any.matches(&DataType::String, &mut bindings));
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_structural_match_through_option() {
        let pattern = DataType::option(DataType::var("T"));
        let mut bindings = TypeBindings::new();

        assert!(pattern.matches(&DataType::option(DataType::Float32), &mut bindings));
        assert_eq!(bindings["T"], DataType::Float32);

        // Non-option candidates do not match an option pattern.
        assert!(!pattern.matches(&DataType::Float32, &mut bindings));
    }

    #[test]
    fn test_tuple_arity_mismatch() {
        let pattern = DataType::Tuple(vec![DataType::Any, DataType::Any]);
        let mut bindings = TypeBindings::new();
        assert!(!pattern.matches(&DataType::Tuple(vec![DataType::Int32]), &mut bindings));
    }

    #[test]
    fn test_symbolic_detection() {
        assert!(DataType::var("T").is_symbolic());
        assert!(DataType::Tuple(vec![DataType::Int32, DataType::Any]).is_symbolic());
        assert!(!DataType::Tuple(vec![DataType::Int32]).is_symbolic());
        assert!(DataType::option(DataType::var("T")).is_symbolic());
    }

    #[test]
    fn test_substitute() {
        let mut bindings = TypeBindings::new();
        bindings.insert("T".to_string(), DataType::Int64);

        let pattern = DataType::Tuple(vec![DataType::var("T"), DataType::var("U")]);
        let result = pattern.substitute(&bindings);
        assert_eq!(
            result,
            DataType::Tuple(vec![DataType::Int64, DataType::var("U")])
        );
    }

    #[test]
    fn test_display() {
        let ty = DataType::Tuple(vec![
            DataType::Int32,
            DataType::String,
            DataType::option(DataType::Float64),
        ]);
        assert_eq!(ty.to_string(), "(int32, string, ?float64)");
    }
}
