//! The call graph: a flattened resolution trace.
//!
//! Resolution does not build a tree. Each callable that participates in a
//! call appends exactly one frame, in depth-first order, and instantiation
//! consumes the frames in that same order — nesting is represented purely
//! by traversal order. A frame carries the callable it belongs to plus a
//! small scratch buffer of plain-old-data written at resolve time and read
//! back at instantiate time (field counts, byte offsets, element sizes).
//!
//! The two phases must agree exactly on what was written: a reader running
//! past the end of its frame means resolve and instantiate disagreed, which
//! is reported as [`Error::InvalidLayout`](crate::Error::InvalidLayout).

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use tessera_kernel::{KernelBuilder, KernelRequest};

use crate::callable::{Callable, KwArgs};
use crate::error::{Error, Result};

/// Inline scratch capacity per frame before spilling to the heap.
const FRAME_INLINE: usize = 64;

/// Per-frame scratch data, written during resolve.
#[derive(Default, Debug)]
pub struct FrameData {
    bytes: SmallVec<[u8; FRAME_INLINE]>,
}

impl FrameData {
    fn with_capacity(bytes: usize) -> FrameData {
        let mut data = FrameData::default();
        data.bytes.reserve(bytes);
        data
    }

    /// Append one plain-old-data value.
    pub fn write_pod<T: Copy>(&mut self, value: T) {
        // SAFETY: reading the bytes of a live T of known size.
        let raw = unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.bytes.extend_from_slice(raw);
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// A sequential reader over the scratch, for the instantiate phase.
    pub fn reader(&self) -> FrameReader<'_> {
        FrameReader {
            bytes: &self.bytes,
            pos: 0,
        }
    }
}

/// Sequential reader over a frame's scratch data.
pub struct FrameReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl FrameReader<'_> {
    /// Read back one plain-old-data value in write order.
    pub fn read_pod<T: Copy>(&mut self) -> Result<T> {
        let size = std::mem::size_of::<T>();
        if self.pos + size > self.bytes.len() {
            return Err(Error::invalid_layout(
                "frame scratch underrun: resolve and instantiate disagree",
            ));
        }
        // SAFETY: bounds checked above; unaligned reads tolerate any
        // packing of the scratch bytes.
        let value = unsafe { (self.bytes.as_ptr().add(self.pos) as *const T).read_unaligned() };
        self.pos += size;
        Ok(value)
    }

    /// Unread bytes left in the frame.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// One slot in a call graph: a callable and its resolve-time scratch.
#[derive(Debug)]
pub struct CallFrame {
    pub(crate) callable: Arc<dyn Callable>,
    pub(crate) data: FrameData,
}

/// An append-only sequence of call frames produced during resolution.
///
/// The graph is built inline-first and spills to the heap as resolution
/// recurses deeper. Once resolution completes the graph is immutable; it
/// can be instantiated any number of times, each instantiation walking the
/// frames front to back with its own cursor.
#[derive(Default, Debug)]
pub struct CallGraph {
    frames: SmallVec<[CallFrame; 4]>,
}

impl CallGraph {
    pub fn new() -> CallGraph {
        CallGraph::default()
    }

    /// Number of frames appended so far.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame for `callable` and expose its scratch for writing.
    ///
    /// Called by a callable's own `resolve`, before it recurses into
    /// children, so that frames land in the exact order instantiation will
    /// consume them.
    pub fn append(&mut self, callable: Arc<dyn Callable>) -> &mut FrameData {
        debug_assert!(
            !callable.is_abstract(),
            "abstract callables do not own frames"
        );
        let capacity = callable.frame_size();
        let index = self.frames.len();
        self.frames.push(CallFrame {
            callable,
            data: FrameData::with_capacity(capacity),
        });
        &mut self.frames[index].data
    }

    /// Start an instantiation pass over the frames.
    pub fn cursor(&self) -> InstantiateCtx<'_> {
        InstantiateCtx {
            frames: &self.frames,
            pos: 0,
        }
    }
}

/// Cursor consuming call frames during instantiation.
pub struct InstantiateCtx<'g> {
    frames: &'g [CallFrame],
    pos: usize,
}

impl<'g> InstantiateCtx<'g> {
    /// Frames not yet consumed.
    pub fn remaining(&self) -> usize {
        self.frames.len() - self.pos
    }

    /// Consume the next frame and instantiate its callable into the arena.
    ///
    /// Parents call this once per child, in the order their `resolve`
    /// appended the children's frames.
    pub fn instantiate_next(
        &mut self,
        builder: &mut KernelBuilder,
        request: KernelRequest,
        dst_arrmeta: &[u8],
        src_arrmeta: &[&[u8]],
        kwargs: &KwArgs,
    ) -> Result<()> {
        let frames: &'g [CallFrame] = self.frames;
        let frame = frames.get(self.pos).ok_or_else(|| {
            Error::invalid_layout("call graph exhausted before instantiation finished")
        })?;
        self.pos += 1;
        trace!(callable = frame.callable.name(), "instantiating frame");
        frame.callable.instantiate(
            frame.data.reader(),
            self,
            builder,
            request,
            dst_arrmeta,
            src_arrmeta,
            kwargs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_round_trip() {
        let mut data = FrameData::default();
        data.write_pod(3usize);
        data.write_pod(0xDEADusize);
        data.write_pod(7u16);

        let mut reader = data.reader();
        assert_eq!(reader.read_pod::<usize>().unwrap(), 3);
        assert_eq!(reader.read_pod::<usize>().unwrap(), 0xDEAD);
        assert_eq!(reader.read_pod::<u16>().unwrap(), 7);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_underrun_is_invalid_layout() {
        let mut data = FrameData::default();
        data.write_pod(1u16);
        let mut reader = data.reader();
        let err = reader.read_pod::<usize>().unwrap_err();
        assert!(matches!(err, Error::InvalidLayout(_)));
    }
}
