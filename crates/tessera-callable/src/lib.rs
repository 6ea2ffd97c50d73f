//! Two-phase resolution and instantiation of typed callables.
//!
//! A callable describes an operation abstractly — its signature may contain
//! type variables or wildcards. Running one against concrete values happens
//! in two phases. [`resolve`] matches the actual argument types, fixes the
//! concrete result type, and records a flattened trace of every
//! participating callable in a [`CallGraph`]. [`instantiate`] walks that
//! trace and assembles a [`KernelChain`]: a chain of small execution units
//! in one relocatable arena that processes elements with no further type
//! dispatch. [`call`] performs both phases and one execution, returning a
//! freshly allocated [`Datum`].
//!
//! ```
//! use tessera_callable::{builtins, call, Datum, KwArgs};
//!
//! let sum = call(
//!     &builtins::add(),
//!     &[Datum::of(2.0_f64), Datum::of(40.0_f64)],
//!     &KwArgs::default(),
//! )
//! .unwrap();
//! assert_eq!(sum.get::<f64>(), Some(42.0));
//! ```
//!
//! # Concurrency
//!
//! Resolution and instantiation are plain synchronous recursion. Callables
//! are immutable `Send + Sync` singletons shared by `Arc`. An instantiated
//! [`KernelChain`] belongs to one caller at a time: kernels treat their
//! fields as read-only configuration, but chains carrying staging buffers
//! mutate them during execution, so the safe sharing pattern is one
//! instantiated chain per thread.

pub mod buffer;
pub mod builtins;
mod callable;
pub mod compose;
mod datum;
mod dispatch;
mod elementwise;
mod error;
mod fieldwise;
mod graph;
pub mod option;

pub use callable::{Callable, KwArgs};
pub use datum::{Datum, ElementValue};
pub use dispatch::{DispatchCallable, DispatchKey, DispatchTable};
pub use elementwise::LeafCallable;
pub use error::{Error, Result};
pub use graph::{CallFrame, CallGraph, FrameData, FrameReader, InstantiateCtx};

pub use tessera_kernel::{KernelChain, KernelRequest};
pub use tessera_types::{DataType, Signature, TypeBindings, TypeId};

use std::sync::Arc;

use tracing::debug;

use tessera_kernel::KernelBuilder;

/// Resolve a call: fix the concrete destination type and build the call
/// graph.
///
/// On error the graph is discarded — resolution failures abort before any
/// kernel exists.
pub fn resolve(
    callable: &Arc<dyn Callable>,
    dst_request: Option<&DataType>,
    src: &[DataType],
    kwargs: &KwArgs,
) -> Result<(DataType, CallGraph)> {
    debug!(callable = callable.name(), src = ?src, "resolving call");
    let mut graph = CallGraph::new();
    let mut bindings = TypeBindings::new();
    let dst = callable
        .clone()
        .resolve(&mut graph, dst_request, src, kwargs, &mut bindings)?;
    debug!(callable = callable.name(), dst = %dst, frames = graph.len(), "call resolved");
    Ok((dst, graph))
}

/// Instantiate a resolved call graph into an executable kernel chain.
///
/// The graph is not consumed: instantiating it again produces an
/// independent chain with identical behavior.
pub fn instantiate(
    graph: &CallGraph,
    request: KernelRequest,
    dst_arrmeta: &[u8],
    src_arrmeta: &[&[u8]],
    kwargs: &KwArgs,
) -> Result<KernelChain> {
    let mut builder = KernelBuilder::new();
    let mut cursor = graph.cursor();
    cursor.instantiate_next(&mut builder, request, dst_arrmeta, src_arrmeta, kwargs)?;
    if cursor.remaining() != 0 {
        return Err(Error::InvalidLayout(format!(
            "{} call frames left unconsumed after instantiation",
            cursor.remaining()
        )));
    }
    Ok(builder.finish())
}

/// Resolve, instantiate, and invoke once, returning a freshly allocated
/// result value.
pub fn call(callable: &Arc<dyn Callable>, args: &[Datum], kwargs: &KwArgs) -> Result<Datum> {
    let src_types: Vec<DataType> = args.iter().map(|a| a.ty().clone()).collect();
    let (dst_ty, graph) = resolve(callable, None, &src_types, kwargs)?;

    let src_arrmeta: Vec<&[u8]> = args.iter().map(|_| &[][..]).collect();
    let mut chain = instantiate(&graph, KernelRequest::Single, &[], &src_arrmeta, kwargs)?;

    let mut result = Datum::zeroed(dst_ty)?;
    let src_ptrs: Vec<*const u8> = args.iter().map(Datum::as_ptr).collect();
    // SAFETY: the chain was built for single execution against exactly
    // these argument types; every pointer covers one live element.
    unsafe {
        chain.single(result.as_mut_ptr(), &src_ptrs);
    }
    Ok(result)
}
