//! Dynamic type values for the tessera runtime.
//!
//! This crate is the type boundary of the runtime: everything the
//! resolution engine needs to know about a value's type lives here, and
//! nothing else does. The engine asks three questions of a type — does a
//! pattern match it (possibly binding named variables), is it still
//! symbolic, and how are its elements laid out in memory — and this crate
//! answers all three without knowing anything about callables or kernels.
//!
//! # Key Types
//!
//! - [`DataType`] - The dynamic type value (concrete or symbolic)
//! - [`TypeId`] - Small copyable dispatch identifier for the outermost constructor
//! - [`TypeBindings`] - Named type-variable bindings accumulated during matching
//! - [`TypeLayout`] - Element byte size and alignment
//! - [`Signature`] - Argument/return type contract of a callable
//! - [`StringView`] - In-memory representation of a string element

mod datatype;
mod id;
mod layout;
mod signature;

pub use datatype::{DataType, TypeBindings};
pub use id::TypeId;
pub use layout::{tuple_layout, StringView, TypeLayout};
pub use signature::{Signature, SignatureError};
