//! Blob: one unit of pipeline data.
//!
//! A blob is an ordered, heterogeneously-typed collection of buffer handles
//! (insertion order = logical buffer index) tagged with stream/frame identity
//! and a timestamp. Producers fill a blob, stamp it, and hand it off to a
//! port; after the handoff the blob is shared behind an `Arc` and may fan out
//! to several downstream consumers, so it must not be mutated further.
//!
//! Retrieval is a checked downcast: asking for the wrong buffer type is a
//! contract violation surfaced as [`Error::TypeMismatch`], never a silently
//! reinterpreted value.

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use std::any::Any;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Type-erased, shared buffer handle stored inside a blob.
pub type BufferHandle = Arc<dyn Any + Send + Sync>;

/// One unit of pipeline data: typed buffers plus routing identity.
#[derive(Default)]
pub struct Blob {
    buffers: Vec<BufferHandle>,
    /// Logical stream this blob belongs to.
    pub stream_id: u32,
    /// Monotonic frame counter within the stream.
    pub frame_id: u64,
    /// Producer-assigned timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Opaque routing tag interpreted by user stages.
    pub tag: u32,
    /// Opaque per-blob context shared with downstream stages.
    pub ctx: Option<Arc<dyn Any + Send + Sync>>,
}

impl Blob {
    /// Create an empty blob with zeroed identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty blob tagged with stream/frame identity.
    pub fn with_identity(stream_id: u32, frame_id: u64) -> Self {
        Self {
            stream_id,
            frame_id,
            ..Self::default()
        }
    }

    /// Stamp the blob with the current wall-clock time.
    pub fn stamp_now(&mut self) {
        self.timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
    }

    /// Append an already-erased buffer handle. O(1), no neighbor validation.
    pub fn push(&mut self, handle: BufferHandle) {
        self.buffers.push(handle);
    }

    /// Construct a plain-data buffer in place and append it.
    pub fn emplace<T>(&mut self, payload: T, len: usize)
    where
        T: Send + Sync + 'static,
    {
        self.buffers.push(Arc::new(Buffer::<T>::new(payload, len)));
    }

    /// Construct a buffer with metadata in place and append it.
    ///
    /// Kept separate from [`Blob::emplace`] so payload-only callers never
    /// monomorphize the metadata path.
    pub fn emplace_with_meta<T, M>(&mut self, payload: T, len: usize, meta: M)
    where
        T: Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        self.buffers
            .push(Arc::new(Buffer::with_meta(payload, len, meta)));
    }

    /// Construct a buffer wrapping an external resource and append it.
    pub fn emplace_with_release<T, M>(
        &mut self,
        payload: T,
        len: usize,
        meta: Option<M>,
        release: impl FnOnce(T, Option<M>) + Send + Sync + 'static,
    ) where
        T: Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        self.buffers
            .push(Arc::new(Buffer::with_release(payload, len, meta, release)));
    }

    /// Retrieve the buffer at `index` as `Buffer<T, M>`.
    ///
    /// The returned handle shares ownership with the blob: the buffer's
    /// release action runs when the last handle drops, wherever that is.
    pub fn get<T, M>(&self, index: usize) -> Result<Arc<Buffer<T, M>>>
    where
        T: Send + Sync + 'static,
        M: Send + Sync + 'static,
    {
        let handle = self.buffers.get(index).ok_or(Error::IndexOutOfBounds {
            index,
            len: self.buffers.len(),
        })?;
        handle
            .clone()
            .downcast::<Buffer<T, M>>()
            .map_err(|_| Error::TypeMismatch {
                index,
                expected: std::any::type_name::<Buffer<T, M>>(),
            })
    }

    /// Retrieve a metadata-less buffer at `index`.
    pub fn get_unmeta<T>(&self, index: usize) -> Result<Arc<Buffer<T>>>
    where
        T: Send + Sync + 'static,
    {
        self.get::<T, ()>(index)
    }

    /// Number of buffers in the blob.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the blob holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("stream_id", &self.stream_id)
            .field("frame_id", &self.frame_id)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("tag", &self.tag)
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emplace_and_get() {
        let mut blob = Blob::with_identity(3, 17);
        blob.emplace(vec![1u8, 2, 3], 3);
        blob.emplace_with_meta(vec![0.5f32; 4], 4, "scores");

        assert_eq!(blob.len(), 2);
        assert_eq!(blob.stream_id, 3);
        assert_eq!(blob.frame_id, 17);

        let raw = blob.get_unmeta::<Vec<u8>>(0).unwrap();
        assert_eq!(raw.payload(), &vec![1, 2, 3]);

        let scored = blob.get::<Vec<f32>, &str>(1).unwrap();
        assert_eq!(scored.meta(), Some(&"scores"));
        assert_eq!(scored.len(), 4);
    }

    #[test]
    fn test_get_type_mismatch_is_typed_error() {
        let mut blob = Blob::new();
        blob.emplace(7u64, 1);

        let err = blob.get_unmeta::<u32>(0).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { index: 0, .. }));
    }

    #[test]
    fn test_get_out_of_bounds() {
        let blob = Blob::new();
        let err = blob.get_unmeta::<u8>(4).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { index: 4, len: 0 }));
    }

    #[test]
    fn test_shared_buffer_released_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();

        let mut blob = Blob::new();
        blob.emplace_with_release::<u64, ()>(99, 1, None, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Fan out: two extra owning handles besides the blob itself.
        let a = blob.get_unmeta::<u64>(0).unwrap();
        let b = blob.get_unmeta::<u64>(0).unwrap();
        drop(blob);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(a);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stamp_now() {
        let mut blob = Blob::new();
        assert_eq!(blob.timestamp_ms, 0);
        blob.stamp_now();
        assert!(blob.timestamp_ms > 0);
    }
}
