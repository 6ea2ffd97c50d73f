//! Nullable (option) values and NA forwarding.
//!
//! An option element shares its value type's storage; absence is a
//! sentinel, not a discriminant: `int32` NA is `i32::MIN`, `int64` NA is
//! `i64::MIN`, floats use NaN, `bool` uses the byte 2, and the NA string is
//! the null view.
//!
//! [`lift`] wraps a callable over plain value types into one over nullable
//! versions of its arguments: at each call the tracked arguments are tested
//! in argument order, the first NA short-circuits into an NA result, and
//! otherwise the child runs on the original (unwrapped) pointers.

use std::marker::PhantomData;
use std::sync::Arc;

use smallvec::SmallVec;

use tessera_kernel::{child_of, Kernel, KernelBuilder, KernelPrefix, KernelRequest};
use tessera_types::{DataType, Signature, StringView, TypeBindings, TypeId};

use crate::builtins::{assign_na, is_na};
use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// Most nullable argument positions a lifted callable tracks.
pub const MAX_CHECKED: usize = 8;

pub(crate) const BOOL_NA: u8 = 2;

/// Element types that carry an in-band absent value.
pub(crate) trait NaElement: Copy + 'static {
    fn is_na(self) -> bool;
    fn na() -> Self;
}

impl NaElement for u8 {
    fn is_na(self) -> bool {
        self == BOOL_NA
    }

    fn na() -> u8 {
        BOOL_NA
    }
}

impl NaElement for i32 {
    fn is_na(self) -> bool {
        self == i32::MIN
    }

    fn na() -> i32 {
        i32::MIN
    }
}

impl NaElement for i64 {
    fn is_na(self) -> bool {
        self == i64::MIN
    }

    fn na() -> i64 {
        i64::MIN
    }
}

impl NaElement for f32 {
    fn is_na(self) -> bool {
        self.is_nan()
    }

    fn na() -> f32 {
        f32::NAN
    }
}

impl NaElement for f64 {
    fn is_na(self) -> bool {
        self.is_nan()
    }

    fn na() -> f64 {
        f64::NAN
    }
}

impl NaElement for StringView {
    fn is_na(self) -> bool {
        StringView::is_na(&self)
    }

    fn na() -> StringView {
        StringView::na()
    }
}

/// Write the NA sentinel for one element of `value_ty` at `dst`.
///
/// # Safety
///
/// `dst` must point at writable storage for one element of `value_ty`.
pub(crate) unsafe fn write_na(value_ty: &DataType, dst: *mut u8) -> Result<()> {
    match value_ty {
        DataType::Bool => *dst = BOOL_NA,
        DataType::Int32 => (dst as *mut i32).write_unaligned(i32::MIN),
        DataType::Int64 => (dst as *mut i64).write_unaligned(i64::MIN),
        DataType::Float32 => (dst as *mut f32).write_unaligned(f32::NAN),
        DataType::Float64 => (dst as *mut f64).write_unaligned(f64::NAN),
        DataType::String => (dst as *mut StringView).write_unaligned(StringView::na()),
        other => {
            return Err(Error::type_mismatch(
                "assign_na",
                format!("type {other} has no absent value"),
            ))
        }
    }
    Ok(())
}

/// Test one element of `value_ty` at `ptr` for the NA sentinel.
///
/// # Safety
///
/// `ptr` must point at a valid element of `value_ty`.
pub(crate) unsafe fn is_na_at(value_ty: &DataType, ptr: *const u8) -> bool {
    match value_ty {
        DataType::Bool => (*ptr).is_na(),
        DataType::Int32 => (ptr as *const i32).read_unaligned().is_na(),
        DataType::Int64 => (ptr as *const i64).read_unaligned().is_na(),
        DataType::Float32 => (ptr as *const f32).read_unaligned().is_na(),
        DataType::Float64 => (ptr as *const f64).read_unaligned().is_na(),
        DataType::String => (ptr as *const StringView).read_unaligned().is_na(),
        _ => false,
    }
}

fn kernel_for_na<F>(id: TypeId, mut emplace: F) -> Result<()>
where
    F: FnMut(NaKind),
{
    let kind = match id {
        TypeId::BOOL => NaKind::Bool,
        TypeId::INT32 => NaKind::Int32,
        TypeId::INT64 => NaKind::Int64,
        TypeId::FLOAT32 => NaKind::Float32,
        TypeId::FLOAT64 => NaKind::Float64,
        TypeId::STRING => NaKind::String,
        other => {
            return Err(Error::invalid_layout(format!(
                "no absent value for {other} elements"
            )))
        }
    };
    emplace(kind);
    Ok(())
}

#[derive(Clone, Copy)]
pub(crate) enum NaKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
}

/// `dst = is_na(src[0]) as u8`, specialized per element type.
pub(crate) struct IsNaKernel<T> {
    _ty: PhantomData<fn() -> T>,
}

impl<T> IsNaKernel<T> {
    fn new() -> Self {
        IsNaKernel { _ty: PhantomData }
    }
}

impl<T: NaElement> Kernel for IsNaKernel<T> {
    fn arity(&self) -> usize {
        1
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let value = *(*src as *const T);
        *dst = value.is_na() as u8;
    }
}

/// Writes the absent value; takes no sources.
pub(crate) struct AssignNaKernel<T> {
    _ty: PhantomData<fn() -> T>,
}

impl<T> AssignNaKernel<T> {
    fn new() -> Self {
        AssignNaKernel { _ty: PhantomData }
    }
}

impl<T: NaElement> Kernel for AssignNaKernel<T> {
    fn arity(&self) -> usize {
        0
    }

    unsafe fn single(&mut self, dst: *mut u8, _src: *const *const u8) {
        *(dst as *mut T) = T::na();
    }
}

/// The `is_na` callable: `(?T) -> bool`.
pub(crate) struct IsNaCallable {
    sig: Signature,
}

impl IsNaCallable {
    pub(crate) fn new() -> IsNaCallable {
        IsNaCallable {
            sig: Signature::new(
                vec![DataType::option(DataType::Any)],
                DataType::Bool,
            ),
        }
    }
}

impl Callable for IsNaCallable {
    fn name(&self) -> &str {
        "is_na"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn frame_size(&self) -> usize {
        std::mem::size_of::<TypeId>()
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        _kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        self.sig
            .resolve_call(src, bindings)
            .map_err(|e| Error::signature("is_na", e))?;
        let value_ty = src[0].strip_option();
        if value_ty.is_symbolic() {
            return Err(Error::type_mismatch(
                "is_na",
                format!("option value type {value_ty} is symbolic"),
            ));
        }
        if let Some(requested) = dst_request {
            if *requested != DataType::Bool {
                return Err(Error::type_mismatch(
                    "is_na",
                    format!("produces bool, caller requires {requested}"),
                ));
            }
        }
        let frame = graph.append(self);
        frame.write_pod(value_ty.type_id());
        Ok(DataType::Bool)
    }

    fn instantiate(
        &self,
        mut frame: FrameReader<'_>,
        _ctx: &mut InstantiateCtx<'_>,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        _dst_arrmeta: &[u8],
        _src_arrmeta: &[&[u8]],
        _kwargs: &KwArgs,
    ) -> Result<()> {
        let id: TypeId = frame.read_pod()?;
        kernel_for_na(id, |kind| match kind {
            NaKind::Bool => {
                builder.emplace(request, IsNaKernel::<u8>::new());
            }
            NaKind::Int32 => {
                builder.emplace(request, IsNaKernel::<i32>::new());
            }
            NaKind::Int64 => {
                builder.emplace(request, IsNaKernel::<i64>::new());
            }
            NaKind::Float32 => {
                builder.emplace(request, IsNaKernel::<f32>::new());
            }
            NaKind::Float64 => {
                builder.emplace(request, IsNaKernel::<f64>::new());
            }
            NaKind::String => {
                builder.emplace(request, IsNaKernel::<StringView>::new());
            }
        })
    }
}

/// The `assign_na` callable: `() -> ?T`, destination-typed.
pub(crate) struct AssignNaCallable {
    sig: Signature,
}

impl AssignNaCallable {
    pub(crate) fn new() -> AssignNaCallable {
        AssignNaCallable {
            sig: Signature::new(vec![], DataType::option(DataType::var("T"))),
        }
    }
}

impl Callable for AssignNaCallable {
    fn name(&self) -> &str {
        "assign_na"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn frame_size(&self) -> usize {
        std::mem::size_of::<TypeId>()
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        _kwargs: &KwArgs,
        _bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        if !src.is_empty() {
            return Err(Error::type_mismatch(
                "assign_na",
                format!("takes no sources, got {}", src.len()),
            ));
        }
        let dst = dst_request
            .ok_or_else(|| {
                Error::type_mismatch("assign_na", "requires a destination type request")
            })?
            .clone();
        let value_ty = match &dst {
            DataType::Option(inner) if !inner.is_symbolic() => (**inner).clone(),
            other => {
                return Err(Error::type_mismatch(
                    "assign_na",
                    format!("destination {other} is not a concrete option type"),
                ))
            }
        };
        let frame = graph.append(self);
        frame.write_pod(value_ty.type_id());
        Ok(dst)
    }

    fn instantiate(
        &self,
        mut frame: FrameReader<'_>,
        _ctx: &mut InstantiateCtx<'_>,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        _dst_arrmeta: &[u8],
        _src_arrmeta: &[&[u8]],
        _kwargs: &KwArgs,
    ) -> Result<()> {
        let id: TypeId = frame.read_pod()?;
        kernel_for_na(id, |kind| match kind {
            NaKind::Bool => {
                builder.emplace(request, AssignNaKernel::<u8>::new());
            }
            NaKind::Int32 => {
                builder.emplace(request, AssignNaKernel::<i32>::new());
            }
            NaKind::Int64 => {
                builder.emplace(request, AssignNaKernel::<i64>::new());
            }
            NaKind::Float32 => {
                builder.emplace(request, AssignNaKernel::<f32>::new());
            }
            NaKind::Float64 => {
                builder.emplace(request, AssignNaKernel::<f64>::new());
            }
            NaKind::String => {
                builder.emplace(request, AssignNaKernel::<StringView>::new());
            }
        })
    }
}

/// Lift `child` over nullable versions of its arguments.
///
/// Argument positions whose actual type is an option are tracked; the
/// result type is the option of the child's result. Execution tests the
/// tracked arguments in order and forwards NA without evaluating the rest.
pub fn lift(child: Arc<dyn Callable>) -> Arc<dyn Callable> {
    let sig = Signature::new(
        child.signature().params().to_vec(),
        DataType::option(child.signature().ret().clone()),
    );
    Arc::new(ForwardNaCallable { sig, child })
}

struct ForwardNaCallable {
    sig: Signature,
    child: Arc<dyn Callable>,
}

impl Callable for ForwardNaCallable {
    fn name(&self) -> &str {
        "forward_na"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn frame_size(&self) -> usize {
        (1 + MAX_CHECKED) * std::mem::size_of::<usize>()
    }

    fn resolve(
        self: Arc<Self>,
        graph: &mut CallGraph,
        dst_request: Option<&DataType>,
        src: &[DataType],
        kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        let checked: SmallVec<[usize; MAX_CHECKED]> = src
            .iter()
            .enumerate()
            .filter(|(_, ty)| ty.is_option())
            .map(|(i, _)| i)
            .collect();
        if checked.len() > MAX_CHECKED {
            return Err(Error::UnsupportedArity {
                callable: "forward_na".to_string(),
                actual: checked.len(),
                limit: MAX_CHECKED,
            });
        }

        let frame = graph.append(self.clone());
        frame.write_pod(checked.len());
        for &position in &checked {
            frame.write_pod(position);
        }

        // Children in instantiation order: one is_na per tracked position,
        // the value child over unwrapped types, then assign_na for the
        // option destination.
        for &position in &checked {
            is_na().resolve(
                graph,
                Some(&DataType::Bool),
                &[src[position].clone()],
                kwargs,
                bindings,
            )?;
        }
        let unwrapped: Vec<DataType> = src.iter().map(DataType::strip_option).collect();
        let child_dst = self
            .child
            .clone()
            .resolve(graph, None, &unwrapped, kwargs, bindings)?;
        let dst = DataType::option(child_dst);
        if let Some(requested) = dst_request {
            if *requested != dst {
                return Err(Error::type_mismatch(
                    "forward_na",
                    format!("produces {dst}, caller requires {requested}"),
                ));
            }
        }
        assign_na().resolve(graph, Some(&dst), &[], kwargs, bindings)?;
        Ok(dst)
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
        let mut positions: SmallVec<[usize; MAX_CHECKED]> = SmallVec::new();
        for _ in 0..count {
            positions.push(frame.read_pod()?);
        }

        let self_offset = builder.emplace(
            request,
            ForwardNaKernel {
                nsrc: src_arrmeta.len(),
                checks: SmallVec::new(),
                value: 0,
                assign_na: 0,
            },
        );

        let mut checks: SmallVec<[(usize, usize); MAX_CHECKED]> = SmallVec::new();
        for &position in &positions {
            let offset = builder.size() - self_offset;
            let meta = src_arrmeta.get(position).copied().unwrap_or(&[]);
            ctx.instantiate_next(builder, KernelRequest::Single, &[], &[meta], kwargs)?;
            checks.push((position, offset));
        }
        let value = builder.size() - self_offset;
        ctx.instantiate_next(
            builder,
            KernelRequest::Single,
            dst_arrmeta,
            src_arrmeta,
            kwargs,
        )?;
        let assign_na = builder.size() - self_offset;
        ctx.instantiate_next(builder, KernelRequest::Single, dst_arrmeta, &[], kwargs)?;

        // The emplace-time pointer may be stale after child growth;
        // re-fetch by offset before patching.
        unsafe {
            let kernel = builder.get_at::<ForwardNaKernel>(self_offset);
            (*kernel).checks = checks;
            (*kernel).value = value;
            (*kernel).assign_na = assign_na;
        }
        Ok(())
    }
}

/// Short-circuiting NA-forwarding kernel.
struct ForwardNaKernel {
    nsrc: usize,
    /// (source position, is_na child offset) per tracked argument.
    checks: SmallVec<[(usize, usize); MAX_CHECKED]>,
    value: usize,
    assign_na: usize,
}

impl Kernel for ForwardNaKernel {
    fn arity(&self) -> usize {
        self.nsrc
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let tracked = self.checks.len();
        for i in 0..tracked {
            let (position, offset) = self.checks[i];
            let argument = *src.add(position);
            let mut flag: u8 = 0;
            KernelPrefix::single(
                child_of(self, offset),
                &mut flag as *mut u8,
                &argument as *const *const u8,
            );
            if flag != 0 {
                let assign_na = self.assign_na;
                KernelPrefix::single(child_of(self, assign_na), dst, std::ptr::null());
                return;
            }
        }
        let value = self.value;
        KernelPrefix::single(child_of(self, value), dst, src);
    }

    unsafe fn destruct(&mut self) {
        let tracked = self.checks.len();
        for i in 0..tracked {
            let (_, offset) = self.checks[i];
            KernelPrefix::destroy(child_of(self, offset));
        }
        let value = self.value;
        let assign_na = self.assign_na;
        KernelPrefix::destroy(child_of(self, value));
        KernelPrefix::destroy(child_of(self, assign_na));
    }
}
