//! Bounded, thread-safe ports connecting pipeline stages.
//!
//! An [`InPort`] owns a bounded FIFO of shared blobs guarded by a mutex and a
//! `not_empty`/`not_full` condvar pair. Overflow behavior is an explicit
//! [`OverflowPolicy`], never an overloaded timeout value: `Blocking` parks the
//! producer until space frees up, `DiscardNew` drops the incoming blob and
//! reports it.
//!
//! An [`OutPort`] holds the link to its downstream peer plus an optional
//! conversion function applied at send time (identity when unset).
//!
//! FIFO order is guaranteed per port; nothing is guaranteed across ports —
//! cross-port ordering is the batching engine's concern.

use crate::blob::Blob;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Default bounded-queue capacity for a freshly created in-port.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// What a port does when a push finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Park the producer until space frees up (or timeout/stop).
    Blocking,
    /// Drop the incoming blob immediately; the queue keeps its oldest blobs.
    DiscardNew,
}

/// Result of a push/send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Status {
    /// Blob enqueued.
    Ok,
    /// Blocking push gave up before space freed.
    Timeout,
    /// Queue full under `DiscardNew`: the incoming blob was dropped.
    Discarded,
    /// Out-port has no linked downstream in-port.
    NoConsumer,
    /// The port was stopped; the blob was not enqueued.
    Stopped,
}

struct Shared {
    queue: VecDeque<Arc<Blob>>,
    stopped: bool,
}

/// Bounded FIFO input port of a stage.
///
/// Capacity is fixed for the lifetime of the port; changing it means draining
/// and recreating the port.
pub struct InPort {
    shared: Mutex<Shared>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl InPort {
    /// Create a port with the given capacity and overflow policy.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Fixed queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Configured overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Whether the port has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Enqueue a blob.
    ///
    /// Under `DiscardNew` a full queue drops the blob and returns
    /// [`Status::Discarded`] without waiting. Under `Blocking` the call waits
    /// on `not_full` up to `timeout` (`None` = until space or stop).
    pub fn push(&self, blob: Arc<Blob>, timeout: Option<Duration>) -> Status {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut shared = self.lock();
        loop {
            if shared.stopped {
                return Status::Stopped;
            }
            if shared.queue.len() < self.capacity {
                shared.queue.push_back(blob);
                self.not_empty.notify_one();
                return Status::Ok;
            }
            match self.policy {
                OverflowPolicy::DiscardNew => {
                    tracing::debug!(
                        stream_id = blob.stream_id,
                        frame_id = blob.frame_id,
                        "port full, discarding incoming blob"
                    );
                    return Status::Discarded;
                }
                OverflowPolicy::Blocking => {
                    shared = match self.wait(&self.not_full, shared, deadline) {
                        Some(guard) => guard,
                        None => return Status::Timeout,
                    };
                }
            }
        }
    }

    /// Zero-wait push. Returns [`Status::Timeout`] when full under
    /// `Blocking`, [`Status::Discarded`] under `DiscardNew`.
    pub fn try_push(&self, blob: Arc<Blob>) -> Status {
        let mut shared = self.lock();
        if shared.stopped {
            return Status::Stopped;
        }
        if shared.queue.len() < self.capacity {
            shared.queue.push_back(blob);
            self.not_empty.notify_one();
            return Status::Ok;
        }
        match self.policy {
            OverflowPolicy::DiscardNew => Status::Discarded,
            OverflowPolicy::Blocking => Status::Timeout,
        }
    }

    /// Peek the head blob without removing it, waiting up to `timeout` for
    /// one to arrive. Returns `None` on timeout or stop-with-empty-queue.
    pub fn front(&self, timeout: Option<Duration>) -> Option<Arc<Blob>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut shared = self.lock();
        loop {
            if let Some(head) = shared.queue.front() {
                return Some(head.clone());
            }
            if shared.stopped {
                return None;
            }
            shared = self.wait(&self.not_empty, shared, deadline)?;
        }
    }

    /// Dequeue the head blob, waiting up to `timeout` for one to arrive.
    ///
    /// Blobs already queued when the port stops are still drained; `None`
    /// means timeout, or stopped with an empty queue.
    pub fn pop(&self, timeout: Option<Duration>) -> Option<Arc<Blob>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut shared = self.lock();
        loop {
            if let Some(blob) = shared.queue.pop_front() {
                self.not_full.notify_one();
                return Some(blob);
            }
            if shared.stopped {
                return None;
            }
            shared = self.wait(&self.not_empty, shared, deadline)?;
        }
    }

    /// Zero-wait peek.
    pub fn try_front(&self) -> Option<Arc<Blob>> {
        self.lock().queue.front().cloned()
    }

    /// Zero-wait dequeue.
    pub fn try_pop(&self) -> Option<Arc<Blob>> {
        let mut shared = self.lock();
        let blob = shared.queue.pop_front();
        if blob.is_some() {
            self.not_full.notify_one();
        }
        blob
    }

    /// Stop the port: wakes every parked producer and consumer (broadcast)
    /// so shutdown is never held up by a permanently empty or full queue.
    pub fn stop(&self) {
        let mut shared = self.lock();
        shared.stopped = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        // Queue state stays coherent even if a holder panicked.
        self.shared
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Wait on `cv` until notified or until `deadline` has passed.
    ///
    /// Returns `None` once the deadline is exhausted. A timed-out wait still
    /// hands the guard back so the caller re-checks its predicate one last
    /// time; the expired deadline ends the loop on the next call.
    fn wait<'a>(
        &self,
        cv: &Condvar,
        guard: std::sync::MutexGuard<'a, Shared>,
        deadline: Option<Instant>,
    ) -> Option<std::sync::MutexGuard<'a, Shared>> {
        match deadline {
            None => Some(
                cv.wait(guard)
                    .unwrap_or_else(std::sync::PoisonError::into_inner),
            ),
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                let (guard, _) = cv
                    .wait_timeout(guard, remaining)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                Some(guard)
            }
        }
    }
}

impl std::fmt::Debug for InPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.lock();
        f.debug_struct("InPort")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &shared.queue.len())
            .field("stopped", &shared.stopped)
            .finish()
    }
}

/// Conversion applied by an out-port before handing a blob downstream.
pub type ConvertFn = Arc<dyn Fn(Arc<Blob>) -> Arc<Blob> + Send + Sync>;

/// Output port of a stage: a link to a downstream [`InPort`] plus an optional
/// schema conversion. Links and conversion are wired by the pipeline before
/// start and are not meant to change while workers run.
#[derive(Default)]
pub struct OutPort {
    peer: RwLock<Option<Arc<InPort>>>,
    convert: RwLock<Option<ConvertFn>>,
}

impl OutPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link this out-port to a downstream in-port.
    pub fn link(&self, peer: Arc<InPort>) {
        *self.write_peer() = Some(peer);
    }

    /// Remove the downstream link.
    pub fn unlink(&self) {
        *self.write_peer() = None;
    }

    /// Whether a downstream in-port is linked.
    pub fn is_linked(&self) -> bool {
        self.read_peer().is_some()
    }

    /// Install a conversion function applied to every sent blob.
    pub fn set_convert(&self, f: ConvertFn) {
        *self
            .convert
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(f);
    }

    /// Whether a conversion function is installed. Lets the composition layer
    /// decide between structural type checks and trusting the conversion.
    pub fn has_convert(&self) -> bool {
        self.convert
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Apply the configured conversion (identity when none is installed).
    pub fn convert(&self, blob: Arc<Blob>) -> Arc<Blob> {
        let convert = self
            .convert
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        match convert {
            Some(f) => f(blob),
            None => blob,
        }
    }

    /// Convert and push the blob to the linked in-port.
    pub fn send(&self, blob: Arc<Blob>, timeout: Option<Duration>) -> Status {
        let peer = match self.read_peer().clone() {
            Some(peer) => peer,
            None => return Status::NoConsumer,
        };
        peer.push(self.convert(blob), timeout)
    }

    fn read_peer(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<InPort>>> {
        self.peer
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write_peer(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<InPort>>> {
        self.peer
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for OutPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutPort")
            .field("linked", &self.is_linked())
            .field("has_convert", &self.has_convert())
            .finish()
    }
}
