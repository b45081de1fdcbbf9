//! Batching engine: assembles one blob per input port into a processable
//! batch.
//!
//! Two built-in grouping algorithms are selected by [`BatchingPolicy`]:
//! ignore-stream pops one blob per port in port order; per-stream additionally
//! tracks the last frame seen per stream, drops stale or duplicate frames at
//! port heads, and only assembles a batch when every port head carries the
//! same `(stream, frame)` identity. A custom algorithm can be installed via
//! [`BatchingConfig::algo`].
//!
//! An empty result always means "no batch available yet, retry later" —
//! never a hard error. Assembly uses peek-then-pop under a per-node lock, so
//! a failed assembly consumes nothing and workers sharing a batch slot never
//! interleave pops.

use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::node::NodeCore;
use crate::port::InPort;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Grouping algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchingPolicy {
    /// Pop one blob per port in port order, ignoring stream identity.
    IgnoreStream,
    /// Group by stream: match `(stream, frame)` across ports, drop stale
    /// frames.
    PerStream,
    /// A user-supplied algorithm is installed via [`BatchingConfig::algo`].
    Custom,
}

/// Pluggable batching function: `(batch_idx, port_indices, node) -> batch`.
pub type BatchingFn = Arc<dyn Fn(usize, &[usize], &NodeCore) -> Vec<Arc<Blob>> + Send + Sync>;

/// Configuration for a stage's batching layer.
#[derive(Clone)]
pub struct BatchingConfig {
    /// Which grouping algorithm runs.
    pub policy: BatchingPolicy,
    /// Blobs per logical batch slot (reserved for user algorithms that
    /// assemble more than one blob per port).
    pub batch_size: usize,
    /// Distinct logical streams handled under `PerStream`.
    pub stream_count: usize,
    /// Workers sharing one batch slot.
    pub threads_per_batch: usize,
    /// Upper bound on each per-port wait during assembly.
    pub fetch_timeout: Duration,
    /// Override algorithm; requires `policy == Custom`.
    pub algo: Option<BatchingFn>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            policy: BatchingPolicy::IgnoreStream,
            batch_size: 1,
            stream_count: 1,
            threads_per_batch: 1,
            fetch_timeout: Duration::from_millis(100),
            algo: None,
        }
    }
}

impl BatchingConfig {
    /// Config running a caller-supplied algorithm.
    pub fn custom(algo: BatchingFn) -> Self {
        Self {
            policy: BatchingPolicy::Custom,
            algo: Some(algo),
            ..Self::default()
        }
    }

    /// Check internal consistency. The policy must match the installed
    /// algorithm: `Custom` without an algorithm (or an algorithm under a
    /// built-in policy) is a configuration error, not a silent fallback.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.threads_per_batch == 0 {
            return Err(Error::Config("threads_per_batch must be at least 1".into()));
        }
        if self.policy == BatchingPolicy::PerStream && self.stream_count == 0 {
            return Err(Error::Config(
                "per-stream batching requires stream_count >= 1".into(),
            ));
        }
        match (self.policy, self.algo.is_some()) {
            (BatchingPolicy::Custom, false) => Err(Error::Config(
                "policy is Custom but no batching algorithm is installed".into(),
            )),
            (BatchingPolicy::Custom, true) => Ok(()),
            (_, true) => Err(Error::Config(
                "batching algorithm installed but policy is not Custom".into(),
            )),
            (_, false) => Ok(()),
        }
    }
}

impl std::fmt::Debug for BatchingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingConfig")
            .field("policy", &self.policy)
            .field("batch_size", &self.batch_size)
            .field("stream_count", &self.stream_count)
            .field("threads_per_batch", &self.threads_per_batch)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("algo", &self.algo.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Per-stream assembly bookkeeping.
#[derive(Default)]
struct BatchState {
    /// Last frame id delivered per stream; anything at or below is stale.
    last_frame: HashMap<u32, u64>,
}

/// Assembles batches from a stage's input ports.
///
/// One engine per node. The internal mutex serializes assembly across the
/// workers sharing the node, which is what makes peek-then-pop sound.
pub struct BatchingEngine {
    fetch_timeout: Duration,
    stream_count: usize,
    state: Mutex<BatchState>,
}

impl BatchingEngine {
    pub fn new(config: &BatchingConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout,
            stream_count: config.stream_count,
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Ignore-stream assembly: one blob per named port, in port order.
    ///
    /// Any per-port wait that times out (or a stopped port) yields an empty
    /// batch; nothing is consumed in that case.
    pub fn ignore_stream(&self, ports: &[Arc<InPort>], port_indices: &[usize]) -> Vec<Arc<Blob>> {
        let _assembly = self.lock_state();
        if port_indices.is_empty() {
            return Vec::new();
        }
        // Peek phase: every port must have a head before anything is popped.
        for &idx in port_indices {
            let Some(port) = ports.get(idx) else {
                tracing::warn!(idx, "batching references nonexistent input port");
                return Vec::new();
            };
            if port.front(Some(self.fetch_timeout)).is_none() {
                return Vec::new();
            }
        }
        self.pop_all(ports, port_indices)
    }

    /// Per-stream assembly: all port heads must agree on `(stream, frame)`.
    ///
    /// Stale or duplicate frames (`frame_id` at or below the last delivered
    /// frame for their stream) found at a port head are popped and dropped
    /// before grouping. A head that is newer, or for a different stream, is
    /// left in place and the assembly reports "no batch yet".
    pub fn per_stream(&self, ports: &[Arc<InPort>], port_indices: &[usize]) -> Vec<Arc<Blob>> {
        let mut state = self.lock_state();
        let Some((&first_idx, rest)) = port_indices.split_first() else {
            return Vec::new();
        };
        let Some(first_port) = ports.get(first_idx) else {
            tracing::warn!(idx = first_idx, "batching references nonexistent input port");
            return Vec::new();
        };

        // Pick the target identity from the first port, skipping stale heads.
        let target = loop {
            let Some(head) = first_port.front(Some(self.fetch_timeout)) else {
                return Vec::new();
            };
            if Self::is_stale(&state, &head) {
                Self::drop_stale(first_port, &head);
                continue;
            }
            break (head.stream_id, head.frame_id);
        };

        // Every other port must present the same identity at its head.
        for &idx in rest {
            let Some(port) = ports.get(idx) else {
                tracing::warn!(idx, "batching references nonexistent input port");
                return Vec::new();
            };
            loop {
                let Some(head) = port.front(Some(self.fetch_timeout)) else {
                    return Vec::new();
                };
                if Self::is_stale(&state, &head) {
                    Self::drop_stale(port, &head);
                    continue;
                }
                if (head.stream_id, head.frame_id) == target {
                    break;
                }
                // Not ours yet; leave the head alone and retry later.
                return Vec::new();
            }
        }

        let batch = self.pop_all(ports, port_indices);
        if !batch.is_empty() {
            state.last_frame.insert(target.0, target.1);
            if state.last_frame.len() > self.stream_count {
                tracing::warn!(
                    streams = state.last_frame.len(),
                    configured = self.stream_count,
                    "observed more streams than stream_count"
                );
            }
        }
        batch
    }

    /// Wake any thread parked inside an assembly wait.
    pub fn stop(&self, ports: &[Arc<InPort>]) {
        for port in ports {
            port.stop();
        }
    }

    /// Pop the (already verified) heads of every named port, in port order.
    fn pop_all(&self, ports: &[Arc<InPort>], port_indices: &[usize]) -> Vec<Arc<Blob>> {
        let mut batch = Vec::with_capacity(port_indices.len());
        for &idx in port_indices {
            match ports[idx].try_pop() {
                Some(blob) => batch.push(blob),
                // Unreachable while assembly is serialized; bail defensively.
                None => return Vec::new(),
            }
        }
        batch
    }

    fn is_stale(state: &BatchState, blob: &Blob) -> bool {
        state
            .last_frame
            .get(&blob.stream_id)
            .is_some_and(|&last| blob.frame_id <= last)
    }

    fn drop_stale(port: &InPort, head: &Blob) {
        tracing::warn!(
            stream_id = head.stream_id,
            frame_id = head.frame_id,
            "dropping stale frame during per-stream batching"
        );
        let _ = port.try_pop();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BatchState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BatchingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingEngine")
            .field("fetch_timeout", &self.fetch_timeout)
            .field("stream_count", &self.stream_count)
            .finish()
    }
}
