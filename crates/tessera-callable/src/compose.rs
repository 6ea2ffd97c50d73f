//! Operator composition: pipe-through-buffer and compound accumulators.

use std::sync::Arc;

use tessera_kernel::{
    child_of, entry_size, ArenaBuffer, Kernel, KernelBuilder, KernelPrefix, KernelRequest,
};
use tessera_types::{DataType, Signature, SignatureError, TypeBindings};

use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// Thread the output of `first` through a one-element intermediate buffer
/// of `buffer_ty` into `second`.
///
/// Resolution resolves `first` from the real sources into the buffer type
/// and `second` from the buffer type to the real destination; the buffer
/// itself is allocated once at instantiation and owned by the kernel.
pub fn compose(
    first: Arc<dyn Callable>,
    second: Arc<dyn Callable>,
    buffer_ty: DataType,
) -> Arc<dyn Callable> {
    let sig = Signature::new(
        first.signature().params().to_vec(),
        second.signature().ret().clone(),
    );
    Arc::new(ComposeCallable {
        sig,
        first,
        second,
        buffer_ty,
    })
}

struct ComposeCallable {
    sig: Signature,
    first: Arc<dyn Callable>,
    second: Arc<dyn Callable>,
    buffer_ty: DataType,
}

impl Callable for ComposeCallable {
    fn name(&self) -> &str {
        "compose"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn frame_size(&self) -> usize {
        std::mem::size_of::<usize>()
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        let layout = self.buffer_ty.layout().ok_or_else(|| {
            Error::type_mismatch("compose", "intermediate buffer type must be concrete")
        })?;

        let frame = graph.append(self.clone());
        frame.write_pod(layout.size);

        let mid = self
            .first
            .clone()
            .resolve(graph, Some(&self.buffer_ty), src, kwargs, bindings)?;
        if mid != self.buffer_ty {
            return Err(Error::type_mismatch(
                "compose",
                format!("first leg produced {mid}, buffer is {}", self.buffer_ty),
            ));
        }
        self.second.clone().resolve(
            graph,
            dst_request,
            &[self.buffer_ty.clone()],
            kwargs,
            bindings,
        )
    }

    fn instantiate(
        &self,
        mut frame: FrameReader<'_>,
        ctx: &mut InstantiateCtx<'_>,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        dst_arrmeta: &[u8],
        src_arrmeta: &[&[u8]],
        kwargs: &KwArgs,
    ) -> Result<()> {
        let buffer_size: usize = frame.read_pod()?;
        let self_offset = builder.emplace(
            request,
            ComposeKernel {
                nsrc: src_arrmeta.len(),
                second: 0,
                buffer: ArenaBuffer::zeroed(buffer_size),
            },
        );

        // First leg sits at the default child offset.
        ctx.instantiate_next(builder, KernelRequest::Single, &[], src_arrmeta, kwargs)?;
        let second = builder.size() - self_offset;
        ctx.instantiate_next(builder, KernelRequest::Single, dst_arrmeta, &[&[]], kwargs)?;

        unsafe {
            let kernel = builder.get_at::<ComposeKernel>(self_offset);
            (*kernel).second = second;
        }
        Ok(())
    }
}

struct ComposeKernel {
    nsrc: usize,
    second: usize,
    buffer: ArenaBuffer,
}

impl Kernel for ComposeKernel {
    fn arity(&self) -> usize {
        self.nsrc
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let staged = self.buffer.as_mut_ptr();
        KernelPrefix::single(child_of(self, entry_size::<ComposeKernel>()), staged, src);
        let staged = staged as *const u8;
        let second = self.second;
        KernelPrefix::single(child_of(self, second), dst, &staged as *const *const u8);
    }

    unsafe fn destruct(&mut self) {
        KernelPrefix::destroy(child_of(self, entry_size::<ComposeKernel>()));
        let second = self.second;
        KernelPrefix::destroy(child_of(self, second));
    }
}

/// Which side of the child the accumulator feeds.
enum Side {
    Left,
    Right,
}

/// Build `dst = child(dst, src)` from a binary `child`.
pub fn left_compound(child: Arc<dyn Callable>) -> Arc<dyn Callable> {
    compound("left_compound", child, Side::Left)
}

/// Build `dst = child(src, dst)` from a binary `child`.
pub fn right_compound(child: Arc<dyn Callable>) -> Arc<dyn Callable> {
    compound("right_compound", child, Side::Right)
}

fn compound(name: &'static str, child: Arc<dyn Callable>, side: Side) -> Arc<dyn Callable> {
    let source_position = match side {
        Side::Left => 1,
        Side::Right => 0,
    };
    let param = child
        .signature()
        .params()
        .get(source_position)
        .cloned()
        .unwrap_or(DataType::Any);
    let sig = Signature::new(vec![param], child.signature().ret().clone());
    Arc::new(CompoundCallable {
        name,
        sig,
        side,
        child,
    })
}

struct CompoundCallable {
    name: &'static str,
    sig: Signature,
    side: Side,
    child: Arc<dyn Callable>,
}

impl Callable for CompoundCallable {
    fn name(&self) -> &str {
        self.name
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        if self.child.signature().arity() != 2 {
            return Err(Error::UnsupportedArity {
                callable: self.name.to_string(),
                actual: self.child.signature().arity(),
                limit: 2,
            });
        }
        if src.len() != 1 {
            return Err(Error::signature(
                self.name,
                SignatureError::Arity {
                    expected: 1,
                    actual: src.len(),
                },
            ));
        }
        // With no destination request the accumulator takes the source
        // element type.
        let accumulator = dst_request.cloned().unwrap_or_else(|| src[0].clone());

        graph.append(self.clone());

        let pair = match self.side {
            Side::Left => [accumulator.clone(), src[0].clone()],
            Side::Right => [src[0].clone(), accumulator.clone()],
        };
        let dst = self
            .child
            .clone()
            .resolve(graph, Some(&accumulator), &pair, kwargs, bindings)?;
        if dst != accumulator {
            return Err(Error::type_mismatch(
                self.name,
                format!("child produced {dst}, accumulator is {accumulator}"),
            ));
        }
        Ok(dst)
    }

    fn instantiate(
        &self,
        _frame: FrameReader<'_>,
        ctx: &mut InstantiateCtx<'_>,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        dst_arrmeta: &[u8],
        src_arrmeta: &[&[u8]],
        kwargs: &KwArgs,
    ) -> Result<()> {
        builder.emplace(
            request,
            CompoundKernel {
                left: matches!(self.side, Side::Left),
            },
        );
        let source_meta = src_arrmeta.first().copied().unwrap_or(&[]);
        let child_meta: [&[u8]; 2] = match self.side {
            Side::Left => [dst_arrmeta, source_meta],
            Side::Right => [source_meta, dst_arrmeta],
        };
        ctx.instantiate_next(
            builder,
            KernelRequest::Single,
            dst_arrmeta,
            &child_meta,
            kwargs,
        )
    }
}

/// Feeds the destination back in as the extra source operand.
struct CompoundKernel {
    left: bool,
}

impl Kernel for CompoundKernel {
    fn arity(&self) -> usize {
        1
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let source = *src;
        let args = if self.left {
            [dst as *const u8, source]
        } else {
            [source, dst as *const u8]
        };
        KernelPrefix::single(
            child_of(self, entry_size::<CompoundKernel>()),
            dst,
            args.as_ptr(),
        );
    }

    unsafe fn destruct(&mut self) {
        KernelPrefix::destroy(child_of(self, entry_size::<CompoundKernel>()));
    }
}
