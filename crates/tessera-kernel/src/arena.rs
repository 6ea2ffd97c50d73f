//! Aligned growable byte storage.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Base alignment of every arena allocation.
///
/// Large enough for any element type the runtime places in a buffer
/// (the widest is a 16-byte aligned vector lane; kernel entries themselves
/// only need 8).
pub const ARENA_ALIGNMENT: usize = 16;

pub(crate) fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// A raw growable buffer with guaranteed base alignment.
///
/// This is the backing store for kernel chains, staging buffers, and
/// one-element values. Growth reallocates, so anything holding a pointer
/// into the buffer across a growing call must re-derive it afterwards.
///
/// Allocation failure is fatal: there is no partial state worth recovering
/// once a kernel chain is half-built, so failures go straight to
/// [`alloc::handle_alloc_error`].
pub struct ArenaBuffer {
    /// Aligned storage, `None` until the first allocation.
    ptr: Option<NonNull<u8>>,
    /// Allocated capacity in bytes.
    capacity: usize,
    /// Used length in bytes.
    len: usize,
}

// The buffer exclusively owns its allocation; raw pointers never escape
// with the buffer's lifetime.
unsafe impl Send for ArenaBuffer {}
unsafe impl Sync for ArenaBuffer {}

impl ArenaBuffer {
    /// Create an empty buffer.
    pub fn new() -> ArenaBuffer {
        ArenaBuffer {
            ptr: None,
            capacity: 0,
            len: 0,
        }
    }

    /// Create a buffer with pre-allocated capacity.
    pub fn with_capacity(bytes: usize) -> ArenaBuffer {
        let mut buf = ArenaBuffer::new();
        if bytes > 0 {
            buf.grow_to(bytes);
        }
        buf
    }

    /// Create a buffer of `bytes` zeroed bytes, length already set.
    pub fn zeroed(bytes: usize) -> ArenaBuffer {
        let mut buf = ArenaBuffer::with_capacity(bytes);
        if bytes > 0 {
            unsafe {
                std::ptr::write_bytes(buf.as_mut_ptr(), 0, bytes);
            }
        }
        buf.len = bytes;
        buf
    }

    /// Used length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ensure room for at least `additional` more bytes past the current
    /// length. May relocate the buffer.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.capacity {
            return;
        }
        let new_capacity = std::cmp::max(required, self.capacity * 2).max(64);
        self.grow_to(new_capacity);
    }

    fn grow_to(&mut self, new_capacity: usize) {
        let layout = Layout::from_size_align(new_capacity, ARENA_ALIGNMENT)
            .expect("invalid arena layout");

        let new_ptr = if let Some(old_ptr) = self.ptr {
            let old_layout = Layout::from_size_align(self.capacity, ARENA_ALIGNMENT)
                .expect("invalid arena layout");
            // SAFETY: old_ptr was allocated with old_layout.
            unsafe {
                let ptr = alloc::realloc(old_ptr.as_ptr(), old_layout, new_capacity);
                match NonNull::new(ptr) {
                    Some(p) => p,
                    None => alloc::handle_alloc_error(layout),
                }
            }
        } else {
            // SAFETY: layout has non-zero size (callers only grow).
            unsafe {
                let ptr = alloc::alloc(layout);
                match NonNull::new(ptr) {
                    Some(p) => p,
                    None => alloc::handle_alloc_error(layout),
                }
            }
        };

        self.ptr = Some(new_ptr);
        self.capacity = new_capacity;
    }

    /// Start of the buffer. Dangling (but aligned) before the first
    /// allocation; only valid for zero-size access then.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        match self.ptr {
            Some(p) => p.as_ptr(),
            None => ARENA_ALIGNMENT as *const u8,
        }
    }

    /// Mutable start of the buffer.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match self.ptr {
            Some(p) => p.as_ptr(),
            None => ARENA_ALIGNMENT as *mut u8,
        }
    }

    /// Set the used length. The bytes up to `len` must have been written.
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len;
    }
}

impl Default for ArenaBuffer {
    fn default() -> Self {
        ArenaBuffer::new()
    }
}

impl Drop for ArenaBuffer {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr {
            let layout = Layout::from_size_align(self.capacity, ARENA_ALIGNMENT)
                .expect("invalid arena layout");
            // SAFETY: ptr was allocated with this layout.
            unsafe {
                alloc::dealloc(ptr.as_ptr(), layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_grows_and_preserves_alignment() {
        let mut buf = ArenaBuffer::new();
        buf.reserve(1);
        assert!(buf.capacity() >= 64);
        assert_eq!(buf.as_ptr() as usize % ARENA_ALIGNMENT, 0);

        buf.reserve(10_000);
        assert!(buf.capacity() >= 10_000);
        assert_eq!(buf.as_ptr() as usize % ARENA_ALIGNMENT, 0);
    }

    #[test]
    fn test_zeroed() {
        let buf = ArenaBuffer::zeroed(128);
        assert_eq!(buf.len(), 128);
        let bytes = unsafe { std::slice::from_raw_parts(buf.as_ptr(), 128) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_growth_preserves_contents() {
        let mut buf = ArenaBuffer::zeroed(8);
        unsafe {
            *buf.as_mut_ptr() = 0xAB;
        }
        buf.reserve(4096);
        assert_eq!(unsafe { *buf.as_ptr() }, 0xAB);
    }
}
