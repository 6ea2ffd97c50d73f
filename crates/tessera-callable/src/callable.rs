//! The callable contract: the two-phase resolve/instantiate protocol.

use std::sync::Arc;

use indexmap::IndexMap;

use tessera_kernel::{KernelBuilder, KernelRequest};
use tessera_types::{DataType, Signature, TypeBindings};

use crate::datum::Datum;
use crate::error::Result;
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// Named keyword arguments threaded through both phases.
#[derive(Default)]
pub struct KwArgs {
    values: IndexMap<String, Datum>,
}

impl KwArgs {
    pub fn new() -> KwArgs {
        KwArgs::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Datum) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Datum> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A resolvable, typed operation descriptor.
///
/// Callables are created once — typically as process-wide named singletons
/// like [`builtins::add`](crate::builtins::add) — and shared immutably by
/// reference. The machinery never copies or destroys them; every call graph
/// that uses a callable holds an `Arc` to it.
///
/// # The two phases
///
/// **Resolve** fixes the concrete destination type for concrete source
/// types. A non-abstract callable appends exactly one frame for itself
/// (writing any layout metadata it will need later into the frame scratch)
/// and then resolves its children in the order their kernels must later be
/// emitted. **Instantiate** reads that frame back, emplaces kernels into
/// the arena, and drives the children via
/// [`InstantiateCtx::instantiate_next`]. By the time instantiate runs, no
/// type compatibility decision remains — only mechanical assembly.
///
/// Resolution must fully complete before instantiation begins; the API
/// enforces this by handing out an [`InstantiateCtx`] only from a finished
/// [`CallGraph`].
///
/// # Abstract callables
///
/// An abstract callable (see [`is_abstract`](Callable::is_abstract))
/// contributes no frame and no kernel of its own: its `resolve` delegates
/// to a concrete target, and the target's frame is what instantiation
/// encounters. Multiple dispatch is the canonical example.
pub trait Callable: Send + Sync {
    /// Stable name, used for logging and error reporting.
    fn name(&self) -> &str;

    // (Debug for `dyn Callable` is provided below via the callable's name.)

    /// The (possibly symbolic) signature this callable was declared with.
    fn signature(&self) -> &Signature;

    /// True for delegation-only callables that never emit a frame.
    fn is_abstract(&self) -> bool {
        false
    }

    /// Scratch bytes this callable writes per frame, as a pre-allocation
    /// hint for the frame's inline buffer.
    fn frame_size(&self) -> usize {
        0
    }

    /// Determine the concrete destination type for the given source types
    /// and record this callable's portion of the call graph.
    ///
    /// `dst_request` is the destination type the caller requires, when it
    /// has one (compose's first leg, assignment targets); a callable whose
    /// result cannot satisfy the request must fail with a type mismatch
    /// rather than silently produce something else. `bindings` carries
    /// type-variable bindings inherited from the enclosing resolution.
    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType>;

    /// Emit this callable's kernel(s) into the arena, consuming the frame
    /// written by `resolve` and driving child frames through `ctx`.
    ///
    /// `dst_arrmeta`/`src_arrmeta` are opaque per-operand metadata blocks
    /// owned by the array layer; they are read-only here and passed through
    /// to children unmodified.
    #[allow(clippy::too_many_arguments)]
    fn instantiate(
        &self,
        frame: FrameReader<'_>,
        ctx: &mut InstantiateCtx<'_>,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        dst_arrmeta: &[u8],
        src_arrmeta: &[&[u8]],
        kwargs: &KwArgs,
    ) -> Result<()>;
}

impl std::fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable").field("name", &self.name()).finish()
    }
}
