//! Structural equality over tuples: per-field kernel recursion.
//!
//! Resolution fixes the field count and per-field byte offsets from the
//! tuple layout and caches them in the frame scratch; instantiation emits
//! one `equal` child kernel per field and records each child's byte offset
//! in an inline array after the parent. There is no re-derivation: if the
//! two phases disagree about the cached counts the error is
//! [`Error::InvalidLayout`](crate::Error::InvalidLayout).

use std::sync::Arc;

use smallvec::SmallVec;

use tessera_kernel::{child_of, Kernel, KernelBuilder, KernelPrefix, KernelRequest};
use tessera_types::{tuple_layout, DataType, Signature, TypeBindings};

use crate::builtins::equal;
use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// The tuple overload of `equal`: identical tuple types, field-by-field.
pub(crate) struct TupleEqualCallable {
    sig: Signature,
}

impl TupleEqualCallable {
    pub(crate) fn new() -> TupleEqualCallable {
        TupleEqualCallable {
            sig: Signature::new(
                vec![DataType::var("T"), DataType::var("T")],
                DataType::Bool,
            ),
        }
    }
}

impl Callable for TupleEqualCallable {
    fn name(&self) -> &str {
        "tuple_equal"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn frame_size(&self) -> usize {
        8 * std::mem::size_of::<usize>()
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        let fields = match src {
            [DataType::Tuple(a), DataType::Tuple(b)] if a == b => a.clone(),
            _ => {
                return Err(Error::type_mismatch(
                    "tuple_equal",
                    "operands must be two identical tuple types",
                ))
            }
        };
        let (_, offsets) = tuple_layout(&fields).ok_or_else(|| {
            Error::type_mismatch("tuple_equal", "tuple fields must be concrete")
        })?;
        if let Some(requested) = dst_request {
            if *requested != DataType::Bool {
                return Err(Error::type_mismatch(
                    "tuple_equal",
                    format!("produces bool, caller requires {requested}"),
                ));
            }
        }

        let frame = graph.append(self.clone());
        frame.write_pod(fields.len());
        for offset in &offsets {
            frame.write_pod(*offset);
        }

        for field in &fields {
            equal().resolve(
                graph,
                Some(&DataType::Bool),
                &[field.clone(), field.clone()],
                kwargs,
                bindings,
            )?;
        }
        Ok(DataType::Bool)
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
        let mut offsets: SmallVec<[usize; 8]> = SmallVec::new();
        for _ in 0..count {
            offsets.push(frame.read_pod()?);
        }

        let self_offset = builder.emplace(
            request,
            TupleEqualKernel {
                fields: SmallVec::new(),
            },
        );

        let mut fields: SmallVec<[(usize, usize); 8]> = SmallVec::new();
        for &data_offset in &offsets {
            let kernel_offset = builder.size() - self_offset;
            ctx.instantiate_next(
                builder,
                KernelRequest::Single,
                dst_arrmeta,
                src_arrmeta,
                kwargs,
            )?;
            fields.push((data_offset, kernel_offset));
        }

        // Re-fetch after child growth before patching the inline array.
        unsafe {
            let kernel = builder.get_at::<TupleEqualKernel>(self_offset);
            (*kernel).fields = fields;
        }
        Ok(())
    }
}

/// Field-by-field comparison with short circuit on the first mismatch.
///
/// The empty tuple compares equal trivially.
struct TupleEqualKernel {
    /// (field data offset, child kernel offset) per field.
    fields: SmallVec<[(usize, usize); 8]>,
}

impl Kernel for TupleEqualKernel {
    fn arity(&self) -> usize {
        2
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let a = *src;
        let b = *src.add(1);
        let count = self.fields.len();
        for i in 0..count {
            let (data_offset, kernel_offset) = self.fields[i];
            let field_args = [a.add(data_offset), b.add(data_offset)];
            let mut flag: u8 = 0;
            KernelPrefix::single(
                child_of(self, kernel_offset),
                &mut flag as *mut u8,
                field_args.as_ptr(),
            );
            if flag == 0 {
                *dst = 0;
                return;
            }
        }
        *dst = 1;
    }

    unsafe fn destruct(&mut self) {
        let count = self.fields.len();
        for i in 0..count {
            let (_, kernel_offset) = self.fields[i];
            KernelPrefix::destroy(child_of(self, kernel_offset));
        }
    }
}
