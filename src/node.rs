//! Stage definition: immutable node metadata, shared runtime core, and the
//! traits a concrete stage implements.
//!
//! A [`NodeCore`] bundles everything a stage's workers share: the input and
//! output ports, the batching engine, the configuration, and the stop flag.
//! Per-worker mutable state (hardware contexts, ordering trackers) lives in
//! the stage's [`NodeWorker`] instead, one per thread.
//!
//! Worker indices are assigned by the pipeline at spawn time and passed in
//! through [`WorkerContext`] — the core carries no shared counter.

use crate::batching::{BatchingConfig, BatchingEngine, BatchingPolicy};
use crate::blob::Blob;
use crate::error::{Error, Result};
use crate::port::{InPort, OutPort, OverflowPolicy, Status, DEFAULT_QUEUE_CAPACITY};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Immutable stage metadata, fixed at pipeline-build time.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Number of input ports.
    pub in_ports: usize,
    /// Number of output ports.
    pub out_ports: usize,
    /// Worker threads spawned for this stage.
    pub total_threads: usize,
    /// Bounded capacity of each input port.
    pub queue_capacity: usize,
    /// Overflow behavior of each input port.
    pub overflow_policy: OverflowPolicy,
    /// Idle wait between retries when no batch is available.
    pub looping_interval: Duration,
    /// Batching layer configuration.
    pub batching: BatchingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            in_ports: 1,
            out_ports: 1,
            total_threads: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::Blocking,
            looping_interval: Duration::from_millis(10),
            batching: BatchingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Set the batching configuration. Only meaningful before the stage is
    /// handed to a pipeline; the core's config is fixed from then on.
    pub fn with_batching(mut self, batching: BatchingConfig) -> Self {
        self.batching = batching;
        self
    }

    /// Set the idle wait between empty-batch retries.
    pub fn with_looping_interval(mut self, interval: Duration) -> Self {
        self.looping_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_threads == 0 {
            return Err(Error::Config("total_threads must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if self.batching.threads_per_batch > self.total_threads {
            return Err(Error::Config(format!(
                "threads_per_batch ({}) exceeds total_threads ({})",
                self.batching.threads_per_batch, self.total_threads
            )));
        }
        self.batching.validate()
    }
}

/// Shared runtime state of one pipeline stage.
pub struct NodeCore {
    name: String,
    config: NodeConfig,
    in_ports: Vec<Arc<InPort>>,
    out_ports: Vec<OutPort>,
    batching: BatchingEngine,
    stopped: AtomicBool,
}

impl NodeCore {
    /// Build the core for a stage: validates the config and creates the
    /// ports. Port capacity and policy are fixed from here on.
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let in_ports = (0..config.in_ports)
            .map(|_| Arc::new(InPort::new(config.queue_capacity, config.overflow_policy)))
            .collect();
        let out_ports = (0..config.out_ports).map(|_| OutPort::new()).collect();
        let batching = BatchingEngine::new(&config.batching);
        Ok(Self {
            name: name.into(),
            config,
            in_ports,
            out_ports,
            batching,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Input port accessor, used by the pipeline for wiring.
    pub fn in_port(&self, index: usize) -> Option<&Arc<InPort>> {
        self.in_ports.get(index)
    }

    /// Output port accessor, used by the pipeline for wiring.
    pub fn out_port(&self, index: usize) -> Option<&OutPort> {
        self.out_ports.get(index)
    }

    pub fn in_port_count(&self) -> usize {
        self.in_ports.len()
    }

    pub fn out_port_count(&self) -> usize {
        self.out_ports.len()
    }

    /// Number of logical batch slots: workers with the same slot share
    /// batches.
    pub fn batch_slots(&self) -> usize {
        (self.config.total_threads / self.config.batching.threads_per_batch).max(1)
    }

    /// Assemble one batch from the named input ports.
    ///
    /// Thin forwarding call into the batching engine (or the installed
    /// custom algorithm). An empty result means "retry later": the caller
    /// should treat it as a no-op iteration, optionally sleeping for the
    /// configured looping interval.
    pub fn get_batched_input(&self, batch_idx: usize, port_indices: &[usize]) -> Vec<Arc<Blob>> {
        if self.is_stopped() {
            return Vec::new();
        }
        if let Some(algo) = &self.config.batching.algo {
            return algo(batch_idx, port_indices, self);
        }
        match self.config.batching.policy {
            BatchingPolicy::IgnoreStream => self.batching.ignore_stream(&self.in_ports, port_indices),
            BatchingPolicy::PerStream => self.batching.per_stream(&self.in_ports, port_indices),
            // Rejected by validate(); nothing sensible to assemble.
            BatchingPolicy::Custom => Vec::new(),
        }
    }

    /// Convenience: batch across all input ports in index order.
    pub fn get_batched_input_all(&self, batch_idx: usize) -> Vec<Arc<Blob>> {
        let indices: Vec<usize> = (0..self.in_ports.len()).collect();
        self.get_batched_input(batch_idx, &indices)
    }

    /// Send a blob out of `port_id`, converting if the out-port has a
    /// conversion installed. After a successful send the blob is handed off
    /// and must not be mutated by the producer.
    pub fn send_output(&self, blob: Arc<Blob>, port_id: usize, timeout: Option<Duration>) -> Status {
        match self.out_ports.get(port_id) {
            Some(port) => port.send(blob, timeout),
            None => {
                tracing::warn!(stage = %self.name, port_id, "send_output to nonexistent port");
                Status::NoConsumer
            }
        }
    }

    /// Stop batching: raises the stop flag and broadcasts on every input
    /// port so workers parked waiting for a batch wake up promptly.
    pub fn stop_batching(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.batching.stop(&self.in_ports);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeCore")
            .field("name", &self.name)
            .field("in_ports", &self.in_ports.len())
            .field("out_ports", &self.out_ports.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Everything a worker needs to talk to its stage: the shared core plus the
/// indices assigned to it by the pipeline at spawn time.
#[derive(Clone)]
pub struct WorkerContext {
    /// Shared stage state.
    pub core: Arc<NodeCore>,
    /// This worker's index within the stage, `0..total_threads`.
    pub worker_idx: usize,
    /// Batch slot this worker serves: `worker_idx / threads_per_batch`.
    pub batch_idx: usize,
}

impl WorkerContext {
    /// Sleep for the stage's looping interval. Stage `process` impls call
    /// this after an empty batch instead of spinning.
    pub fn idle_wait(&self) {
        let interval = self.core.config().looping_interval;
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    /// Whether the stage has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.core.is_stopped()
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("stage", &self.core.name())
            .field("worker_idx", &self.worker_idx)
            .field("batch_idx", &self.batch_idx)
            .finish()
    }
}

/// A stage type. Implementations are factories for their per-thread workers;
/// the pipeline calls [`Node::create_worker`] exactly `total_threads` times.
pub trait Node: Send + Sync {
    fn create_worker(&self, ctx: WorkerContext) -> Box<dyn NodeWorker>;
}

/// One running instance of a stage, owned by a single thread.
///
/// Lifecycle: `init` → repeated `process` calls driven by the worker loop →
/// `deinit`. `deinit` always runs — after a clean stop, after a `process`
/// error, and after a failed `init` (releasing whatever partial state the
/// init acquired). `process` must not block indefinitely without honoring
/// the stage stop flag; bounded port waits take care of this for code that
/// goes through `get_batched_input`/`send_output`.
pub trait NodeWorker: Send {
    /// Acquire per-thread resources (hardware contexts, scratch memory).
    /// A failure prevents the worker from entering its run loop.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Process one batch slot iteration. The only method a concrete stage
    /// must implement. May call `send_output` any number of times,
    /// including zero to drop a frame.
    fn process(&mut self, batch_idx: usize) -> Result<()>;

    /// Release resources acquired in `init`.
    fn deinit(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_validation() {
        assert!(NodeConfig::default().validate().is_ok());

        let bad = NodeConfig {
            total_threads: 0,
            ..NodeConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = NodeConfig {
            total_threads: 2,
            batching: BatchingConfig {
                threads_per_batch: 4,
                ..BatchingConfig::default()
            },
            ..NodeConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_core_creates_ports() {
        let core = NodeCore::new(
            "detect",
            NodeConfig {
                in_ports: 2,
                out_ports: 3,
                ..NodeConfig::default()
            },
        )
        .unwrap();
        assert_eq!(core.in_port_count(), 2);
        assert_eq!(core.out_port_count(), 3);
        assert!(core.in_port(1).is_some());
        assert!(core.in_port(2).is_none());
        assert!(core.out_port(2).is_some());
    }

    #[test]
    fn test_batch_slots() {
        let core = NodeCore::new(
            "infer",
            NodeConfig {
                total_threads: 4,
                batching: BatchingConfig {
                    threads_per_batch: 2,
                    ..BatchingConfig::default()
                },
                ..NodeConfig::default()
            },
        )
        .unwrap();
        assert_eq!(core.batch_slots(), 2);
    }

    #[test]
    fn test_send_output_unlinked_reports_no_consumer() {
        let core = NodeCore::new("sink", NodeConfig::default()).unwrap();
        let status = core.send_output(Arc::new(Blob::new()), 0, None);
        assert_eq!(status, Status::NoConsumer);
        // Nonexistent port id behaves the same.
        let status = core.send_output(Arc::new(Blob::new()), 9, None);
        assert_eq!(status, Status::NoConsumer);
    }

    #[test]
    fn test_custom_batching_algo_invoked() {
        let algo: crate::batching::BatchingFn = Arc::new(|batch_idx, _, _| {
            vec![Arc::new(Blob::with_identity(0, batch_idx as u64))]
        });
        let core = NodeCore::new(
            "custom",
            NodeConfig {
                batching: BatchingConfig::custom(algo),
                ..NodeConfig::default()
            },
        )
        .unwrap();
        let batch = core.get_batched_input(3, &[0]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].frame_id, 3);
    }

    #[test]
    fn test_stopped_core_yields_empty_batches() {
        let core = NodeCore::new("stopped", NodeConfig::default()).unwrap();
        core.stop_batching();
        assert!(core.is_stopped());
        assert!(core.get_batched_input_all(0).is_empty());
    }
}
