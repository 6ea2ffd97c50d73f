//! Placement-construction of kernel chains.

use crate::arena::{round_up, ArenaBuffer};
use crate::kernel::{Entry, Kernel, KernelPrefix, KernelRequest, KERNEL_ALIGNMENT};

/// Builds a kernel chain by placing entries at increasing byte offsets.
///
/// The builder owns a relocatable arena: [`emplace`](KernelBuilder::emplace)
/// may grow the storage and move every byte already written. Offsets stay
/// valid across growth; raw pointers do not. Any pointer from
/// [`get_at`](KernelBuilder::get_at) held across an `emplace` or
/// [`reserve`](KernelBuilder::reserve) must be re-fetched afterwards.
///
/// The first entry emplaced is the root of the chain. Dropping a builder
/// without [`finish`](KernelBuilder::finish) frees the arena bytes but does
/// not run kernel destructors; abandoning a half-built chain can leak
/// payload-owned buffers, which only happens on defect paths.
pub struct KernelBuilder {
    data: ArenaBuffer,
}

impl KernelBuilder {
    /// Create an empty builder.
    pub fn new() -> KernelBuilder {
        KernelBuilder {
            data: ArenaBuffer::new(),
        }
    }

    /// Current write offset in bytes.
    ///
    /// Taken before and after emitting a sub-chain, the difference is the
    /// byte span that sub-chain occupies.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Pre-grow the arena. May relocate existing bytes.
    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    /// Construct a kernel entry in place at the current write offset and
    /// return its byte offset.
    ///
    /// The entry's function pointer is selected by `request`; its
    /// destructor is wired to drop the payload after
    /// [`Kernel::destruct`] has run.
    pub fn emplace<K: Kernel>(&mut self, request: KernelRequest, payload: K) -> usize {
        // Alignment above the quantum cannot be honored at arbitrary
        // offsets; such a payload is a construction-time defect.
        assert!(
            std::mem::align_of::<K>() <= KERNEL_ALIGNMENT,
            "kernel payload alignment exceeds the arena quantum"
        );
        let offset = round_up(self.data.len(), KERNEL_ALIGNMENT);
        let end = offset + std::mem::size_of::<Entry<K>>();
        if end > self.data.capacity() {
            self.data.reserve(end - self.data.len());
        }
        // SAFETY: capacity covers `end`, the offset is aligned for the
        // entry, and the bytes being written are unused.
        unsafe {
            let ptr = self.data.as_mut_ptr().add(offset) as *mut Entry<K>;
            ptr.write(Entry {
                prefix: KernelPrefix::new::<K>(request),
                payload,
            });
        }
        self.data.set_len(end);
        offset
    }

    /// Recover a typed payload pointer for a previously emplaced kernel.
    ///
    /// # Safety
    ///
    /// `offset` must come from an [`emplace`](KernelBuilder::emplace) of the
    /// same payload type `K` on this builder. The pointer is invalidated by
    /// the next `emplace`/`reserve`.
    pub unsafe fn get_at<K: Kernel>(&mut self, offset: usize) -> *mut K {
        let entry = self.data.as_mut_ptr().add(offset) as *mut Entry<K>;
        &mut (*entry).payload as *mut K
    }

    /// Freeze the arena into an executable chain.
    pub fn finish(self) -> KernelChain {
        KernelChain { data: self.data }
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        KernelBuilder::new()
    }
}

/// A finished kernel chain: one arena holding a root kernel and its
/// children, executable and torn down as a unit.
///
/// Dropping the chain invokes the root destructor, which recursively
/// destroys children via the same offsets execution uses. An explicit early
/// [`destroy`](KernelChain::destroy) makes the eventual drop a no-op.
pub struct KernelChain {
    data: ArenaBuffer,
}

impl KernelChain {
    /// Check if the chain holds no kernels.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte span of the chain.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn root(&mut self) -> *mut KernelPrefix {
        self.data.as_mut_ptr() as *mut KernelPrefix
    }

    /// Execute the root kernel on one element.
    ///
    /// # Safety
    ///
    /// The chain must have been instantiated with
    /// [`KernelRequest::Single`]; `dst` and the `src` pointers must point
    /// at valid elements of the resolved destination/source types.
    pub unsafe fn single(&mut self, dst: *mut u8, src: &[*const u8]) {
        debug_assert!(!self.is_empty());
        KernelPrefix::single(self.root(), dst, src.as_ptr())
    }

    /// Execute the root kernel over `count` elements with byte strides.
    ///
    /// # Safety
    ///
    /// The chain must have been instantiated with
    /// [`KernelRequest::Strided`]; each operand needs `count` valid
    /// elements at its given stride.
    pub unsafe fn strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_strides: &[isize],
        count: usize,
    ) {
        debug_assert!(!self.is_empty());
        debug_assert_eq!(src.len(), src_strides.len());
        KernelPrefix::strided(
            self.root(),
            dst,
            dst_stride,
            src.as_ptr(),
            src_strides.as_ptr(),
            count,
        )
    }

    /// Execute the root kernel on whole array-level values.
    ///
    /// # Safety
    ///
    /// The chain must have been instantiated with [`KernelRequest::Call`];
    /// the handles must be the value representation the chain was built
    /// for.
    pub unsafe fn call(&mut self, dst: *mut (), src: &[*const ()]) {
        debug_assert!(!self.is_empty());
        KernelPrefix::call(self.root(), dst, src.as_ptr())
    }

    /// Tear the chain down now. Safe to call more than once; the eventual
    /// drop will not re-run destructors.
    pub fn destroy(&mut self) {
        if !self.is_empty() {
            // SAFETY: the root entry is live; destructor slots clear
            // themselves before running.
            unsafe {
                KernelPrefix::destroy(self.root());
            }
        }
    }
}

impl Drop for KernelChain {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::kernel::{child_of, entry_size};

    /// Leaf test kernel: dst = src[0] + 1, `single` only.
    struct AddOne;

    impl Kernel for AddOne {
        fn arity(&self) -> usize {
            1
        }

        unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
            *(dst as *mut i64) = *(*src as *const i64) + 1;
        }
    }

    /// Parent test kernel delegating to one child at the default offset.
    struct Delegate {
        child: usize,
    }

    impl Kernel for Delegate {
        fn arity(&self) -> usize {
            1
        }

        unsafe fn single(&mut self, dst: *mut u8, src: *const *const u8) {
            KernelPrefix::single(child_of(self, self.child), dst, src)
        }

        unsafe fn destruct(&mut self) {
            KernelPrefix::destroy(child_of(self, self.child));
        }
    }

    /// Test double counting destructor runs through its payload drop.
    struct Counting {
        hits: Arc<AtomicUsize>,
    }

    impl Kernel for Counting {
        fn arity(&self) -> usize {
            0
        }

        unsafe fn single(&mut self, _dst: *mut u8, _src: *const *const u8) {}
    }

    impl Drop for Counting {
        fn drop(&mut self) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Parent counting kernel owning one counting child.
    struct CountingParent {
        hits: Arc<AtomicUsize>,
        child: usize,
    }

    impl Kernel for CountingParent {
        fn arity(&self) -> usize {
            0
        }

        unsafe fn single(&mut self, _dst: *mut u8, _src: *const *const u8) {}

        unsafe fn destruct(&mut self) {
            KernelPrefix::destroy(child_of(self, self.child));
        }
    }

    impl Drop for CountingParent {
        fn drop(&mut self) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_single_leaf() {
        let mut builder = KernelBuilder::new();
        builder.emplace(KernelRequest::Single, AddOne);
        let mut chain = builder.finish();

        let x: i64 = 41;
        let mut out: i64 = 0;
        unsafe {
            chain.single(&mut out as *mut i64 as *mut u8, &[&x as *const i64 as *const u8]);
        }
        assert_eq!(out, 42);
    }

    #[test]
    fn test_default_strided_adapter_matches_manual_singles() {
        // A kernel implementing only `single`, driven through `strided`
        // over five elements, must match five manually advanced singles.
        let src: [i64; 5] = [1, 2, 3, 4, 5];
        let mut expected = [0i64; 5];
        {
            let mut builder = KernelBuilder::new();
            builder.emplace(KernelRequest::Single, AddOne);
            let mut chain = builder.finish();
            for i in 0..5 {
                unsafe {
                    chain.single(
                        &mut expected[i] as *mut i64 as *mut u8,
                        &[&src[i] as *const i64 as *const u8],
                    );
                }
            }
        }

        let mut out = [0i64; 5];
        let mut builder = KernelBuilder::new();
        builder.emplace(KernelRequest::Strided, AddOne);
        let mut chain = builder.finish();
        unsafe {
            chain.strided(
                out.as_mut_ptr() as *mut u8,
                std::mem::size_of::<i64>() as isize,
                &[src.as_ptr() as *const u8],
                &[std::mem::size_of::<i64>() as isize],
                5,
            );
        }
        assert_eq!(out, expected);
    }

    #[test]
    fn test_child_at_default_offset() {
        let mut builder = KernelBuilder::new();
        let parent = builder.emplace(
            KernelRequest::Single,
            Delegate {
                child: entry_size::<Delegate>(),
            },
        );
        let child = builder.emplace(KernelRequest::Single, AddOne);
        assert_eq!(child - parent, entry_size::<Delegate>());

        let mut chain = builder.finish();
        let x: i64 = 7;
        let mut out: i64 = 0;
        unsafe {
            chain.single(&mut out as *mut i64 as *mut u8, &[&x as *const i64 as *const u8]);
        }
        assert_eq!(out, 8);
    }

    #[test]
    fn test_growth_relocation_keeps_offsets_valid() {
        let mut builder = KernelBuilder::new();
        let mut offsets = Vec::new();
        for _ in 0..256 {
            offsets.push(builder.emplace(KernelRequest::Single, AddOne));
        }
        // Every offset still recovers a working kernel after many growths.
        let root = offsets[0];
        assert_eq!(root, 0);
        let mut chain = builder.finish();
        let x: i64 = 1;
        let mut out: i64 = 0;
        unsafe {
            chain.single(&mut out as *mut i64 as *mut u8, &[&x as *const i64 as *const u8]);
        }
        assert_eq!(out, 2);
    }

    /// Value handle for the array-level entry: a length-carrying run the
    /// strided contract cannot describe.
    struct Run {
        values: Vec<i64>,
    }

    /// Sums a whole run into a scalar via the array-level entry.
    struct SumRun;

    impl Kernel for SumRun {
        fn arity(&self) -> usize {
            1
        }

        unsafe fn single(&mut self, _dst: *mut u8, _src: *const *const u8) {
            unreachable!("instantiated for array-level invocation only")
        }

        unsafe fn call(&mut self, dst: *mut (), src: *const *const ()) {
            let run = &*(*src as *const Run);
            *(dst as *mut i64) = run.values.iter().sum();
        }
    }

    #[test]
    fn test_array_level_call_entry() {
        let mut builder = KernelBuilder::new();
        builder.emplace(KernelRequest::Call, SumRun);
        let mut chain = builder.finish();

        let run = Run {
            values: vec![1, 2, 3, 4],
        };
        let mut out: i64 = 0;
        unsafe {
            chain.call(
                &mut out as *mut i64 as *mut (),
                &[&run as *const Run as *const ()],
            );
        }
        assert_eq!(out, 10);
    }

    #[test]
    fn test_teardown_runs_each_destructor_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut builder = KernelBuilder::new();
        let parent_off = builder.emplace(
            KernelRequest::Single,
            CountingParent {
                hits: hits.clone(),
                child: 0,
            },
        );
        let child_off = builder.emplace(
            KernelRequest::Single,
            Counting { hits: hits.clone() },
        );
        unsafe {
            (*builder.get_at::<CountingParent>(parent_off)).child = child_off - parent_off;
        }

        let mut chain = builder.finish();
        chain.destroy();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Explicit destroy plus drop still runs each destructor once.
        chain.destroy();
        drop(chain);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
