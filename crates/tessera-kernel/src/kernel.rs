//! The kernel execution contract and the common entry prefix.

use smallvec::SmallVec;

use crate::arena::round_up;

/// Alignment quantum for kernel entries within the arena.
///
/// Every entry starts at a multiple of this, and every entry's size rounds
/// up to it, so "immediately after the current kernel" is always a valid
/// entry offset. Payloads needing stronger alignment are a construction-time
/// defect.
pub const KERNEL_ALIGNMENT: usize = 8;

/// Which execution entry point a kernel is instantiated for.
///
/// The prefix holds a single function pointer; its type is fixed at
/// emplacement by this request. A parent kernel must invoke each child with
/// the request the child was instantiated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelRequest {
    /// One element per invocation.
    Single,
    /// A run of elements advancing by byte strides.
    Strided,
    /// Whole array-level values with their own metadata, for steps whose
    /// shape is not expressible as plain strides.
    Call,
}

/// Entry point processing one element.
pub type SingleFn = unsafe fn(*mut KernelPrefix, *mut u8, *const *const u8);

/// Entry point processing `count` elements with per-operand byte strides.
pub type StridedFn =
    unsafe fn(*mut KernelPrefix, *mut u8, isize, *const *const u8, *const isize, usize);

/// Entry point for array-level invocation. The handles are opaque to this
/// crate; the layer that instantiated the kernel owns their meaning.
pub type CallFn = unsafe fn(*mut KernelPrefix, *mut (), *const *const ());

type DestructorFn = unsafe fn(*mut KernelPrefix);

/// Common header of every kernel entry in the arena.
///
/// The destructor slot is cleared before it runs, so destroying a kernel
/// twice is a no-op — the arena invokes the root destructor exactly once,
/// and parents destroy each child exactly once, but a defensive double call
/// cannot double-free.
#[repr(C)]
pub struct KernelPrefix {
    function: *const (),
    destructor: Option<DestructorFn>,
}

impl KernelPrefix {
    pub(crate) fn new<K: Kernel>(request: KernelRequest) -> KernelPrefix {
        let function = match request {
            KernelRequest::Single => single_shim::<K> as SingleFn as *const (),
            KernelRequest::Strided => strided_shim::<K> as StridedFn as *const (),
            KernelRequest::Call => call_shim::<K> as CallFn as *const (),
        };
        KernelPrefix {
            function,
            destructor: Some(destruct_shim::<K>),
        }
    }

    /// Invoke the single entry point.
    ///
    /// # Safety
    ///
    /// The kernel must have been instantiated with [`KernelRequest::Single`],
    /// and `dst`/`src` must point at valid elements of the resolved types.
    #[inline]
    pub unsafe fn single(this: *mut KernelPrefix, dst: *mut u8, src: *const *const u8) {
        let f: SingleFn = std::mem::transmute((*this).function);
        f(this, dst, src)
    }

    /// Invoke the strided entry point.
    ///
    /// # Safety
    ///
    /// The kernel must have been instantiated with
    /// [`KernelRequest::Strided`], and the pointer/stride arrays must cover
    /// the kernel's arity with `count` valid elements each.
    #[inline]
    pub unsafe fn strided(
        this: *mut KernelPrefix,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_strides: *const isize,
        count: usize,
    ) {
        let f: StridedFn = std::mem::transmute((*this).function);
        f(this, dst, dst_stride, src, src_strides, count)
    }

    /// Invoke the array-level entry point.
    ///
    /// # Safety
    ///
    /// The kernel must have been instantiated with [`KernelRequest::Call`];
    /// the handles must be the value representation that kernel was built
    /// for.
    #[inline]
    pub unsafe fn call(this: *mut KernelPrefix, dst: *mut (), src: *const *const ()) {
        let f: CallFn = std::mem::transmute((*this).function);
        f(this, dst, src)
    }

    /// Run the destructor if it has not already run.
    ///
    /// # Safety
    ///
    /// `this` must point at a live kernel entry.
    pub unsafe fn destroy(this: *mut KernelPrefix) {
        if let Some(destructor) = (*this).destructor.take() {
            destructor(this)
        }
    }

    /// The prefix of the kernel `offset` bytes past this entry.
    ///
    /// # Safety
    ///
    /// A kernel entry must have been emplaced at that offset in the same
    /// arena.
    #[inline]
    pub unsafe fn child_at(this: *mut KernelPrefix, offset: usize) -> *mut KernelPrefix {
        (this as *mut u8).add(offset) as *mut KernelPrefix
    }
}

/// A kernel payload: the fields following the prefix in one arena entry.
///
/// Leaf kernels implement [`single`](Kernel::single) and inherit the
/// default [`strided`](Kernel::strided) loop; kernels with a worthwhile
/// vectorized path override `strided`. Kernels owning children or buffers
/// implement [`destruct`](Kernel::destruct) to tear children down in offset
/// order (their own fields drop afterwards as usual).
///
/// After instantiation a kernel's fields are read-only configuration as far
/// as sharing is concerned: a chain may be invoked from one thread at a
/// time only, and stateful kernels must not be shared across concurrent
/// callers at all.
pub trait Kernel: Send + 'static {
    /// Number of source operands, used by the default strided loop.
    fn arity(&self) -> usize;

    /// Process one element.
    ///
    /// # Safety
    ///
    /// `dst` points at writable storage for one destination element and
    /// `src` at `arity()` readable source element pointers.
    unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8);

    /// Process `count` elements, advancing `dst` by `dst_stride` and each
    /// source pointer by its stride after every element.
    ///
    /// # Safety
    ///
    /// As for [`single`](Kernel::single), over `count` elements per operand.
    unsafe fn strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: *const *const u8,
        src_strides: *const isize,
        count: usize,
    ) {
        let arity = self.arity();
        let mut ptrs: SmallVec<[*const u8; 8]> = SmallVec::with_capacity(arity);
        for i in 0..arity {
            ptrs.push(*src.add(i));
        }
        let mut dst = dst;
        for _ in 0..count {
            self.single(dst, ptrs.as_ptr());
            dst = dst.offset(dst_stride);
            for i in 0..arity {
                ptrs[i] = ptrs[i].offset(*src_strides.add(i));
            }
        }
    }

    /// Array-level invocation over opaque value handles, for kernels that
    /// need metadata not expressible as element pointers and strides.
    ///
    /// Optional: kernels without an array-level form must not be
    /// instantiated under [`KernelRequest::Call`].
    ///
    /// # Safety
    ///
    /// The handles must be the value representation this kernel was built
    /// for.
    unsafe fn call(&mut self, _dst: *mut (), _src: *const *const ()) {
        panic!("kernel has no array-level entry point")
    }

    /// Tear down children and owned resources. Runs exactly once, before
    /// the payload itself drops.
    ///
    /// # Safety
    ///
    /// Must only be invoked by the arena teardown machinery.
    unsafe fn destruct(&mut self) {}
}

/// One arena entry: the common prefix followed by the typed payload.
#[repr(C)]
pub(crate) struct Entry<K> {
    pub(crate) prefix: KernelPrefix,
    pub(crate) payload: K,
}

/// Byte span of an emplaced entry for `K`; also the default offset of its
/// first child (the exactly-one-child common case).
pub fn entry_size<K: Kernel>() -> usize {
    round_up(std::mem::size_of::<Entry<K>>(), KERNEL_ALIGNMENT)
}

/// Recover the entry prefix of a payload.
///
/// # Safety
///
/// `payload` must point at the payload of a live arena entry.
#[inline]
pub unsafe fn prefix_of<K: Kernel>(payload: *mut K) -> *mut KernelPrefix {
    (payload as *mut u8).sub(std::mem::offset_of!(Entry<K>, payload)) as *mut KernelPrefix
}

/// The prefix of the child kernel `offset` bytes from this kernel's own
/// entry.
///
/// # Safety
///
/// As for [`prefix_of`]; a child must have been emplaced at that offset.
#[inline]
pub unsafe fn child_of<K: Kernel>(payload: *mut K, offset: usize) -> *mut KernelPrefix {
    KernelPrefix::child_at(prefix_of(payload), offset)
}

unsafe fn single_shim<K: Kernel>(prefix: *mut KernelPrefix, dst: *mut u8, src: *const *const u8) {
    let entry = prefix as *mut Entry<K>;
    (*entry).payload.single(dst, src)
}

unsafe fn strided_shim<K: Kernel>(
    prefix: *mut KernelPrefix,
    dst: *mut u8,
    dst_stride: isize,
    src: *const *const u8,
    src_strides: *const isize,
    count: usize,
) {
    let entry = prefix as *mut Entry<K>;
    (*entry)
        .payload
        .strided(dst, dst_stride, src, src_strides, count)
}

unsafe fn call_shim<K: Kernel>(prefix: *mut KernelPrefix, dst: *mut (), src: *const *const ()) {
    let entry = prefix as *mut Entry<K>;
    (*entry).payload.call(dst, src)
}

unsafe fn destruct_shim<K: Kernel>(prefix: *mut KernelPrefix) {
    let entry = prefix as *mut Entry<K>;
    (*entry).payload.destruct();
    std::ptr::drop_in_place(&mut (*entry).payload);
}
