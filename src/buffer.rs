//! Typed, move-only buffer: an owned payload plus optional metadata and a
//! release action.
//!
//! A `Buffer` is the smallest unit of ownership in the pipeline. Plain data
//! buffers drop normally; buffers wrapping an external resource (a DMA file
//! descriptor, a device surface) carry a release action that runs exactly once
//! when the buffer is dropped, returning the resource to whoever produced it.
//!
//! Buffers are deliberately not `Clone`: duplicating a handle to a hardware
//! resource would make ownership ambiguous. [`Buffer::try_clone`] offers a
//! deep copy for plain data only.

use crate::error::{Error, Result};

/// Release action invoked with the payload and metadata when the buffer drops.
pub type ReleaseFn<T, M> = Box<dyn FnOnce(T, Option<M>) + Send + Sync>;

/// An owned payload of element type `T` with optional metadata `M`.
///
/// `len` is the element count of the payload as understood by the producer
/// (e.g. bytes of a bitstream slice, pixels of a plane); the buffer itself
/// does not interpret it.
pub struct Buffer<T, M = ()> {
    // `None` only while the release action consumes the fields during drop.
    payload: Option<T>,
    meta: Option<M>,
    len: usize,
    release: Option<ReleaseFn<T, M>>,
}

impl<T, M> Buffer<T, M> {
    /// Create a buffer over plain owned data. Dropping it drops the payload.
    pub fn new(payload: T, len: usize) -> Self {
        Self {
            payload: Some(payload),
            meta: None,
            len,
            release: None,
        }
    }

    /// Create a buffer with metadata attached.
    pub fn with_meta(payload: T, len: usize, meta: M) -> Self {
        Self {
            payload: Some(payload),
            meta: Some(meta),
            len,
            release: None,
        }
    }

    /// Create a buffer wrapping an external resource.
    ///
    /// The release action is the only path that frees the resource; it runs
    /// exactly once, when the buffer is dropped. Payloads that are raw
    /// handles (fds, device pointers wrapped in plain structs) must be built
    /// through this constructor so the resource is never leaked or freed by
    /// a generic drop.
    pub fn with_release(
        payload: T,
        len: usize,
        meta: Option<M>,
        release: impl FnOnce(T, Option<M>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            payload: Some(payload),
            meta,
            len,
            release: Some(Box::new(release)),
        }
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &T {
        self.payload
            .as_ref()
            .expect("buffer payload is present until drop")
    }

    /// Borrow the metadata, if any.
    pub fn meta(&self) -> Option<&M> {
        self.meta.as_ref()
    }

    /// Element count of the payload.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the producer marked this buffer as empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Update the element count (e.g. after a partial hardware fill).
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    /// Attach or replace the metadata.
    pub fn set_meta(&mut self, meta: M) {
        self.meta = Some(meta);
    }

    /// Whether a release action is installed.
    pub fn has_release(&self) -> bool {
        self.release.is_some()
    }
}

impl<T: Clone, M: Clone> Buffer<T, M> {
    /// Deep-copy the payload and metadata.
    ///
    /// Fails with [`Error::Uncloneable`] when a release action owns the
    /// underlying resource — a copied handle would alias it.
    pub fn try_clone(&self) -> Result<Self> {
        if self.release.is_some() {
            return Err(Error::Uncloneable);
        }
        Ok(Self {
            payload: self.payload.clone(),
            meta: self.meta.clone(),
            len: self.len,
            release: None,
        })
    }
}

impl<T, M> Drop for Buffer<T, M> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Some(payload) = self.payload.take() {
                release(payload, self.meta.take());
            }
        }
        // No release action: payload/meta drop normally.
    }
}

impl<T, M> std::fmt::Debug for Buffer<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("has_meta", &self.meta.is_some())
            .field("has_release", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_plain_buffer_accessors() {
        let mut buf: Buffer<Vec<u8>> = Buffer::new(vec![1, 2, 3], 3);
        assert_eq!(buf.payload(), &vec![1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert!(buf.meta().is_none());
        assert!(!buf.has_release());

        buf.set_len(2);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_buffer_with_meta() {
        let mut buf = Buffer::with_meta(vec![0u8; 16], 16, "nv12");
        assert_eq!(buf.meta(), Some(&"nv12"));
        buf.set_meta("i420");
        assert_eq!(buf.meta(), Some(&"i420"));
    }

    #[test]
    fn test_release_runs_exactly_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        {
            let buf = Buffer::with_release(42u64, 1, Some("meta"), move |payload, meta| {
                assert_eq!(payload, 42);
                assert_eq!(meta, Some("meta"));
                counter.fetch_add(1, Ordering::SeqCst);
            });
            assert!(buf.has_release());
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_clone_plain_data() {
        let buf = Buffer::with_meta(vec![1u8, 2], 2, 7u32);
        let copy = buf.try_clone().unwrap();
        assert_eq!(copy.payload(), buf.payload());
        assert_eq!(copy.meta(), buf.meta());
        assert!(!copy.has_release());
    }

    #[test]
    fn test_try_clone_rejected_for_external_resource() {
        let buf: Buffer<u64, ()> = Buffer::with_release(3, 1, None, |_, _| {});
        assert!(matches!(buf.try_clone(), Err(Error::Uncloneable)));
    }

    #[test]
    fn test_no_release_drops_payload() {
        // Arc payload: dropping the buffer must drop its strong count.
        let payload = Arc::new(5u32);
        let weak = Arc::downgrade(&payload);
        let buf: Buffer<Arc<u32>> = Buffer::new(payload, 1);
        drop(buf);
        assert!(weak.upgrade().is_none());
    }
}
