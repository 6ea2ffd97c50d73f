//! Operand buffering: staging mismatched-type operands through conversion
//! kernels.
//!
//! When a wrapped callable expects an operand type different from the
//! operand's actual runtime type, the buffered wrapper interposes a
//! conversion kernel (`assign`, actual → expected) and a staging buffer for
//! that position. Strided execution processes runs in chunks of
//! [`BUFFER_CHUNK`] elements, so staging memory stays bounded regardless of
//! total run length.

use std::sync::Arc;

use smallvec::SmallVec;

use tessera_kernel::{child_of, ArenaBuffer, Kernel, KernelBuilder, KernelPrefix, KernelRequest};
use tessera_types::{DataType, Signature, SignatureError, TypeBindings};

use crate::builtins::assign;
use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// Elements staged per chunk during strided execution.
pub const BUFFER_CHUNK: usize = 128;

/// Wrap `child` so that operands whose actual type differs from
/// `expected` are converted through a staging buffer before `child` runs.
pub fn buffered(child: Arc<dyn Callable>, expected: Vec<DataType>) -> Arc<dyn Callable> {
    let sig = Signature::new(
        vec![DataType::Any; expected.len()],
        child.signature().ret().clone(),
    );
    Arc::new(BufferedCallable {
        sig,
        child,
        expected,
    })
}

struct BufferedCallable {
    sig: Signature,
    child: Arc<dyn Callable>,
    expected: Vec<DataType>,
}

impl Callable for BufferedCallable {
    fn name(&self) -> &str {
        "buffered"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn frame_size(&self) -> usize {
        (1 + 2 * self.expected.len()) * std::mem::size_of::<usize>()
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        if src.len() != self.expected.len() {
            return Err(Error::signature(
                "buffered",
                SignatureError::Arity {
                    expected: self.expected.len(),
                    actual: src.len(),
                },
            ));
        }
        let staged: SmallVec<[usize; 4]> = src
            .iter()
            .zip(&self.expected)
            .enumerate()
            .filter(|(_, (actual, expected))| actual != expected)
            .map(|(i, _)| i)
            .collect();

        let frame = graph.append(self.clone());
        frame.write_pod(staged.len());
        for &position in &staged {
            let layout = self.expected[position].layout().ok_or_else(|| {
                Error::type_mismatch(
                    "buffered",
                    format!("expected type {} is symbolic", self.expected[position]),
                )
            })?;
            frame.write_pod(position);
            frame.write_pod(layout.size);
        }

        for &position in &staged {
            assign().resolve(
                graph,
                Some(&self.expected[position]),
                &[src[position].clone()],
                kwargs,
                bindings,
            )?;
        }
        self.child
            .clone()
            .resolve(graph, dst_request, &self.expected, kwargs, bindings)
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
        let count: usize = frame.read_pod()?;
        let mut staged: SmallVec<[(usize, usize); 4]> = SmallVec::new();
        for _ in 0..count {
            let position: usize = frame.read_pod()?;
            let element_size: usize = frame.read_pod()?;
            staged.push((position, element_size));
        }

        let self_offset = builder.emplace(
            request,
            BufferedKernel {
                nsrc: src_arrmeta.len(),
                operands: SmallVec::new(),
                value: 0,
            },
        );

        // Conversions and the child all follow the parent's request: the
        // single path stages one element, the strided path stages chunks.
        let mut operands: SmallVec<[BufferedOperand; 2]> = SmallVec::new();
        for &(position, element_size) in &staged {
            let kernel = builder.size() - self_offset;
            let meta = src_arrmeta.get(position).copied().unwrap_or(&[]);
            ctx.instantiate_next(builder, request, &[], &[meta], kwargs)?;
            operands.push(BufferedOperand {
                position,
                kernel,
                element_size,
                buffer: ArenaBuffer::zeroed(element_size * BUFFER_CHUNK),
            });
        }
        let value = builder.size() - self_offset;
        ctx.instantiate_next(builder, request, dst_arrmeta, src_arrmeta, kwargs)?;

        unsafe {
            let kernel = builder.get_at::<BufferedKernel>(self_offset);
            (*kernel).operands = operands;
            (*kernel).value = value;
        }
        Ok(())
    }
}

struct BufferedOperand {
    position: usize,
    kernel: usize,
    element_size: usize,
    buffer: ArenaBuffer,
}

/// Conversion staging kernel.
///
/// Children share the parent's instantiation request, so `single` only runs
/// when the chain was built for single execution and `strided` only when it
/// was built for strided execution.
struct BufferedKernel {
    nsrc: usize,
    operands: SmallVec<[BufferedOperand; 2]>,
    value: usize,
}

impl Kernel for BufferedKernel {
    fn arity(&self) -> usize {
        self.nsrc
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let mut pointers: SmallVec<[*const u8; 8]> = SmallVec::with_capacity(self.nsrc);
        for i in 0..self.nsrc {
            pointers.push(*src.add(i));
        }
        let count = self.operands.len();
        for i in 0..count {
            let position = self.operands[i].position;
            let kernel = self.operands[i].kernel;
            let staged = self.operands[i].buffer.as_mut_ptr();
            let argument = pointers[position];
            KernelPrefix::single(child_of(self, kernel), staged, &argument as *const *const u8);
            pointers[position] = staged as *const u8;
        }
        let value = self.value;
        KernelPrefix::single(child_of(self, value), dst, pointers.as_ptr());
    }

    unsafe fn strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_strides: *const isize,
        count: usize,
    ) {
        let mut sources: SmallVec<[*const u8; 8]> = SmallVec::with_capacity(self.nsrc);
        let mut strides: SmallVec<[isize; 8]> = SmallVec::with_capacity(self.nsrc);
        for i in 0..self.nsrc {
            sources.push(*src.add(i));
            strides.push(*src_strides.add(i));
        }
        // Staged operands advance through their buffer at element pitch.
        let mut chunk_strides = strides.clone();
        for i in 0..self.operands.len() {
            chunk_strides[self.operands[i].position] = self.operands[i].element_size as isize;
        }

        let mut dst = dst;
        let mut remaining = count;
        while remaining > 0 {
            let run = remaining.min(BUFFER_CHUNK);
            let mut pointers = sources.clone();
            for i in 0..self.operands.len() {
                let position = self.operands[i].position;
                let kernel = self.operands[i].kernel;
                let element_size = self.operands[i].element_size;
                let staged = self.operands[i].buffer.as_mut_ptr();
                let argument = sources[position];
                let stride = strides[position];
                KernelPrefix::strided(
                    child_of(self, kernel),
                    staged,
                    element_size as isize,
                    &argument as *const *const u8,
                    &stride as *const isize,
                    run,
                );
                pointers[position] = staged as *const u8;
            }
            let value = self.value;
            KernelPrefix::strided(
                child_of(self, value),
                dst,
                dst_stride,
                pointers.as_ptr(),
                chunk_strides.as_ptr(),
                run,
            );
            dst = dst.offset(dst_stride * run as isize);
            for i in 0..self.nsrc {
                sources[i] = sources[i].offset(strides[i] * run as isize);
            }
            remaining -= run;
        }
    }

    unsafe fn destruct(&mut self) {
        let count = self.operands.len();
        for i in 0..count {
            let kernel = self.operands[i].kernel;
            KernelPrefix::destroy(child_of(self, kernel));
        }
        let value = self.value;
        KernelPrefix::destroy(child_of(self, value));
    }
}
