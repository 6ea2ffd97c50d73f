//! Leaf callables and the elementwise kernels behind them.
//!
//! A leaf is the end of a resolution: its signature matches or the call
//! fails, and its instantiation is a single kernel emplacement with no
//! children. All concrete arithmetic, comparison, and assignment kernels
//! live here; everything type-generic happens before they run.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use tessera_kernel::{Kernel, KernelBuilder, KernelRequest};
use tessera_types::{DataType, Signature, StringView, TypeBindings};

use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};
use crate::graph::{CallGraph, FrameReader, InstantiateCtx};

/// A leaf callable: one signature, one kernel type, no children.
pub struct LeafCallable<K: Kernel> {
    name: &'static str,
    sig: Signature,
    make: fn() -> K,
}

impl<K: Kernel> LeafCallable<K> {
    pub fn new(name: &'static str, sig: Signature, make: fn() -> K) -> Arc<LeafCallable<K>> {
        Arc::new(LeafCallable { name, sig, make })
    }
}

impl<K: Kernel> Callable for LeafCallable<K> {
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
        _kwargs: &KwArgs,
        bindings: &mut TypeBindings,
    ) -> Result<DataType> {
        let dst = self
            .sig
            .resolve_call(src, bindings)
            .map_err(|e| Error::signature(self.name, e))?;
        if let Some(requested) = dst_request {
            if *requested != dst {
                return Err(Error::type_mismatch(
                    self.name,
                    format!("produces {dst}, caller requires {requested}"),
                ));
            }
        }
        graph.append(self);
        Ok(dst)
    }

    fn instantiate(
        &self,
        _frame: FrameReader<'_>,
        _ctx: &mut InstantiateCtx<'_>,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        _dst_arrmeta: &[u8],
        _src_arrmeta: &[&[u8]],
        _kwargs: &KwArgs,
    ) -> Result<()> {
        trace!(callable = self.name, "emplacing leaf kernel");
        builder.emplace(request, (self.make)());
        Ok(())
    }
}

/// Shorthand constructor used by the builtin tables.
pub(crate) fn leaf<K: Kernel>(
    name: &'static str,
    params: Vec<DataType>,
    ret: DataType,
    make: fn() -> K,
) -> Arc<dyn Callable> {
    LeafCallable::new(name, Signature::new(params, ret), make)
}

macro_rules! binary_arith_kernel {
    ($(#[$meta:meta])* $name:ident, $bound:ident, $method:ident) => {
        $(#[$meta])*
        pub struct $name<T> {
            _ty: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            pub fn new() -> Self {
                $name { _ty: PhantomData }
            }
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<T: Copy + std::ops::$bound<Output = T> + 'static> Kernel for $name<T> {
            fn arity(&self) -> usize {
                2
            }

            unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
                let a = *(*src as *const T);
                let b = *(*src.add(1) as *const T);
                *(dst as *mut T) = std::ops::$bound::$method(a, b);
            }
        }
    };
}

binary_arith_kernel!(
    /// `dst = src[0] + src[1]` over one element type.
    AddKernel,
    Add,
    add
);
binary_arith_kernel!(
    /// `dst = src[0] - src[1]`.
    SubtractKernel,
    Sub,
    sub
);
binary_arith_kernel!(
    /// `dst = src[0] * src[1]`.
    MultiplyKernel,
    Mul,
    mul
);

/// `dst = (src[0] == src[1]) as u8` over one element type.
pub struct EqualKernel<T> {
    _ty: PhantomData<fn() -> T>,
}

impl<T> EqualKernel<T> {
    pub fn new() -> Self {
        EqualKernel { _ty: PhantomData }
    }
}

impl<T> Default for EqualKernel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + PartialEq + 'static> Kernel for EqualKernel<T> {
    fn arity(&self) -> usize {
        2
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let a = *(*src as *const T);
        let b = *(*src.add(1) as *const T);
        *dst = (a == b) as u8;
    }
}

/// Byte-wise string equality; two NA views compare equal.
pub struct StringEqualKernel;

impl StringEqualKernel {
    pub fn new() -> Self {
        StringEqualKernel
    }
}

impl Kernel for StringEqualKernel {
    fn arity(&self) -> usize {
        2
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let a = *(*src as *const StringView);
        let b = *(*src.add(1) as *const StringView);
        let equal = match (a.is_na(), b.is_na()) {
            (true, true) => true,
            (false, false) => a.as_bytes() == b.as_bytes(),
            _ => false,
        };
        *dst = equal as u8;
    }
}

/// Identity copy of one element.
pub struct AssignKernel<T> {
    _ty: PhantomData<fn() -> T>,
}

impl<T> AssignKernel<T> {
    pub fn new() -> Self {
        AssignKernel { _ty: PhantomData }
    }
}

impl<T> Default for AssignKernel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + 'static> Kernel for AssignKernel<T> {
    fn arity(&self) -> usize {
        1
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        *(dst as *mut T) = *(*src as *const T);
    }
}

/// Numeric cast used by the conversion overloads of `assign`.
pub(crate) trait CastFrom<S>: Sized {
    fn cast_from(value: S) -> Self;
}

macro_rules! cast_impl {
    ($src:ty => $dst:ty) => {
        impl CastFrom<$src> for $dst {
            #[inline]
            fn cast_from(value: $src) -> $dst {
                value as $dst
            }
        }
    };
}

cast_impl!(i32 => i64);
cast_impl!(i32 => f32);
cast_impl!(i32 => f64);
cast_impl!(i64 => f64);
cast_impl!(f32 => f64);
cast_impl!(f64 => f32);

/// Converting copy: reads `S`, writes `D`.
pub struct ConvertKernel<S, D> {
    _ty: PhantomData<fn(S) -> D>,
}

impl<S, D> ConvertKernel<S, D> {
    pub fn new() -> Self {
        ConvertKernel { _ty: PhantomData }
    }
}

impl<S, D> Default for ConvertKernel<S, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Copy + 'static, D: CastFrom<S> + Copy + 'static> Kernel for ConvertKernel<S, D> {
    fn arity(&self) -> usize {
        1
    }

    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
        let value = *(*src as *const S);
        *(dst as *mut D) = D::cast_from(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::TypeBindings;

    #[test]
    fn test_leaf_rejects_wrong_types() {
        let callable = leaf(
            "add",
            vec![DataType::Float64, DataType::Float64],
            DataType::Float64,
            AddKernel::<f64>::new,
        );
        let mut graph = CallGraph::new();
        let mut bindings = TypeBindings::new();
        let err = callable
            .clone()
            .resolve(
                &mut graph,
                None,
                &[DataType::Float64, DataType::Int32],
                &KwArgs::default(),
                &mut bindings,
            )
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        // A failed resolve leaves nothing behind to instantiate.
        assert!(graph.is_empty());
    }

    #[test]
    fn test_leaf_appends_one_frame() {
        let callable = leaf(
            "add",
            vec![DataType::Int32, DataType::Int32],
            DataType::Int32,
            AddKernel::<i32>::new,
        );
        let mut graph = CallGraph::new();
        let mut bindings = TypeBindings::new();
        let dst = callable
            .clone()
            .resolve(
                &mut graph,
                None,
                &[DataType::Int32, DataType::Int32],
                &KwArgs::default(),
                &mut bindings,
            )
            .unwrap();
        assert_eq!(dst, DataType::Int32);
        assert_eq!(graph.len(), 1);
    }
}
