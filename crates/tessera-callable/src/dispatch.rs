//! Multiple dispatch by concrete type identifiers.
//!
//! A dispatch table maps a tuple of [`TypeId`]s — one per source operand,
//! optionally preceded by the destination id — to a concrete overload. The
//! lookup is exact-key only: no promotion or subtype search happens here.
//! Promotions are expressed as separate wrapper callables layered on top
//! (see [`buffer::buffered`](crate::buffer::buffered)).
//!
//! Tables are built once when their owning callable is constructed and are
//! read-only afterwards. A miss is a hard, typed error, raised at resolve
//! time.

use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::debug;

use tessera_kernel::{KernelBuilder, KernelRequest};
use tessera_types::{DataType, Signature, SignatureError, TypeBindings, TypeId};

use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// A dispatch key: type identifiers in operand order, with the destination
/// id first for destination-keyed tables.
pub type DispatchKey = SmallVec<[TypeId; 3]>;

fn format_key(key: &[TypeId]) -> String {
    key.iter()
        .map(|id| id.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// An immutable-after-construction table of overloads.
pub struct DispatchTable {
    name: &'static str,
    overloads: IndexMap<DispatchKey, Arc<dyn Callable>>,
}

impl DispatchTable {
    /// Create an empty table for the named callable.
    pub fn new(name: &'static str) -> DispatchTable {
        DispatchTable {
            name,
            overloads: IndexMap::new(),
        }
    }

    /// Register an overload. Duplicate keys are rejected, never overridden.
    pub fn insert(
        &mut self,
        key: impl IntoIterator<Item = TypeId>,
        callable: Arc<dyn Callable>,
    ) -> Result<()> {
        let key: DispatchKey = key.into_iter().collect();
        if self.overloads.contains_key(&key) {
            return Err(Error::DuplicateOverload {
                callable: self.name.to_string(),
                types: format_key(&key),
            });
        }
        self.overloads.insert(key, callable);
        Ok(())
    }

    /// Exact-key lookup. A miss is [`Error::NoOverload`].
    pub fn specialize(&self, key: &DispatchKey) -> Result<&Arc<dyn Callable>> {
        self.overloads.get(key).ok_or_else(|| Error::NoOverload {
            callable: self.name.to_string(),
            types: format_key(key),
        })
    }

    /// Number of registered overloads.
    pub fn len(&self) -> usize {
        self.overloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overloads.is_empty()
    }
}

/// A multiple-dispatch callable.
///
/// Abstract: it appends no frame of its own. Resolution picks the overload
/// for the concrete operand ids and delegates to it, so the overload's
/// frame is what instantiation encounters — the dispatch decision leaves no
/// trace in the call graph.
pub struct DispatchCallable {
    name: &'static str,
    sig: Signature,
    keyed_by_dst: bool,
    table: DispatchTable,
}

impl DispatchCallable {
    /// Wrap a finished table. `keyed_by_dst` prepends the destination type
    /// id to every lookup key (used by `assign`, whose overload depends on
    /// both ends of the conversion).
    pub fn new(
        name: &'static str,
        arity: usize,
        keyed_by_dst: bool,
        table: DispatchTable,
    ) -> DispatchCallable {
        DispatchCallable {
            name,
            sig: Signature::new(vec![DataType::Any; arity], DataType::Any),
            keyed_by_dst,
            table,
        }
    }
}

impl Callable for DispatchCallable {
    fn name(&self) -> &str {
        self.name
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn is_abstract(&self) -> bool {
        true
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        if src.len() != self.sig.arity() {
            return Err(Error::signature(
                self.name,
                SignatureError::Arity {
                    expected: self.sig.arity(),
                    actual: src.len(),
                },
            ));
        }
        let mut key = DispatchKey::new();
        if self.keyed_by_dst {
            let dst = dst_request.cloned().unwrap_or_else(|| src[0].clone());
            key.push(dst.type_id());
        }
        for ty in src {
            if ty.is_symbolic() {
                return Err(Error::type_mismatch(
                    self.name,
                    format!("source type {ty} is symbolic"),
                ));
            }
            key.push(ty.type_id());
        }
        let target = self.table.specialize(&key)?.clone();
        debug!(
            callable = self.name,
            target = target.name(),
            "dispatch specialized"
        );
        target.resolve(graph, dst_request, src, kwargs, bindings)
    }

    fn instantiate(
        &self,
        _frame: FrameReader<'_>,
        _ctx: &mut InstantiateCtx<'_>,
        _builder: &mut KernelBuilder,
        _request: KernelRequest,
        _dst_arrmeta: &[u8],
        _src_arrmeta: &[&[u8]],
        _kwargs: &KwArgs,
    ) -> Result<()> {
        // Abstract callables never own a frame; reaching here means a frame
        // was appended for one.
        Err(Error::invalid_layout(
            "abstract callable has no kernel of its own",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;

    #[test]
    fn test_duplicate_overload_rejected() {
        // Policy: tables are write-once; a second insert under the same key
        // is an error, not an override.
        let mut table = DispatchTable::new("demo");
        table
            .insert([TypeId::INT32, TypeId::INT32], builtins::add())
            .unwrap();
        let err = table
            .insert([TypeId::INT32, TypeId::INT32], builtins::add())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOverload { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_miss_is_no_overload() {
        let table = DispatchTable::new("demo");
        let key: DispatchKey = [TypeId::STRING, TypeId::STRING].into_iter().collect();
        let err = table.specialize(&key).unwrap_err();
        assert!(matches!(err, Error::NoOverload { .. }));
    }
}
