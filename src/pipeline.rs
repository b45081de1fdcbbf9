//! Pipeline composition layer.
//!
//! Builds a graph of stages, wires output ports to input ports (optionally
//! through a conversion function when schemas differ), then spawns the
//! configured number of worker threads per stage and owns their shutdown.
//!
//! ```text
//! [decode] ──► [infer] ──► [encode]
//!          └─► [osd]  ──┘
//! ```
//!
//! Wiring is only legal before `start()`. Stopping raises every stage's stop
//! flag first (waking workers parked on empty ports), then breaks each worker
//! loop and joins the threads; in-flight batches are abandoned after the
//! workers' `deinit` hooks run.

use crate::error::{Error, Result};
use crate::node::{Node, NodeConfig, NodeCore, WorkerContext};
use crate::port::ConvertFn;
use crate::worker::{run_worker, WorkerControl, WorkerEvent};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Opaque handle to a stage registered with a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageId(usize);

struct Stage {
    core: Arc<NodeCore>,
    node: Box<dyn Node>,
}

/// A composed pipeline: stages, wiring, and run control.
pub struct Pipeline {
    stages: Vec<Stage>,
    handles: Vec<JoinHandle<()>>,
    controls: Vec<Arc<WorkerControl>>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    running: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            stages: Vec::new(),
            handles: Vec::new(),
            controls: Vec::new(),
            events_tx,
            events_rx,
            running: false,
        }
    }

    /// Register a stage. Validates its configuration and creates its ports.
    pub fn add_stage(
        &mut self,
        name: impl Into<String>,
        node: Box<dyn Node>,
        config: NodeConfig,
    ) -> Result<StageId> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        let core = Arc::new(NodeCore::new(name, config)?);
        let id = StageId(self.stages.len());
        self.stages.push(Stage { core, node });
        Ok(id)
    }

    /// Shared core of a registered stage (port access, manual batching).
    pub fn stage(&self, id: StageId) -> Option<&Arc<NodeCore>> {
        self.stages.get(id.0).map(|s| &s.core)
    }

    /// Wire `from`'s output port `out_idx` to `to`'s input port `in_idx`.
    pub fn link(&mut self, from: StageId, out_idx: usize, to: StageId, in_idx: usize) -> Result<()> {
        self.wire(from, out_idx, to, in_idx, None)
    }

    /// Wire with a conversion function applied to every blob crossing the
    /// link, for neighbors with differing blob schemas.
    pub fn link_with(
        &mut self,
        from: StageId,
        out_idx: usize,
        to: StageId,
        in_idx: usize,
        convert: ConvertFn,
    ) -> Result<()> {
        self.wire(from, out_idx, to, in_idx, Some(convert))
    }

    fn wire(
        &mut self,
        from: StageId,
        out_idx: usize,
        to: StageId,
        in_idx: usize,
        convert: Option<ConvertFn>,
    ) -> Result<()> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }
        let to_core = self
            .stages
            .get(to.0)
            .ok_or_else(|| Error::Config(format!("unknown stage id {:?}", to)))?;
        let in_port = to_core
            .core
            .in_port(in_idx)
            .ok_or_else(|| {
                Error::Config(format!(
                    "stage '{}' has no input port {}",
                    to_core.core.name(),
                    in_idx
                ))
            })?
            .clone();

        let from_stage = self
            .stages
            .get(from.0)
            .ok_or_else(|| Error::Config(format!("unknown stage id {:?}", from)))?;
        let out_port = from_stage.core.out_port(out_idx).ok_or_else(|| {
            Error::Config(format!(
                "stage '{}' has no output port {}",
                from_stage.core.name(),
                out_idx
            ))
        })?;

        out_port.link(in_port);
        if let Some(convert) = convert {
            out_port.set_convert(convert);
        }
        tracing::debug!(
            from = %from_stage.core.name(),
            out_idx,
            to = %to_core.core.name(),
            in_idx,
            "linked stages"
        );
        Ok(())
    }

    /// Spawn every stage's workers. Worker indices (and through them batch
    /// slots) are assigned here, at spawn time.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }

        if let Err(e) = self.spawn_all() {
            // Roll back whatever already started before surfacing.
            self.abort_spawned();
            return Err(e);
        }

        self.running = true;
        tracing::info!(
            stages = self.stages.len(),
            workers = self.handles.len(),
            "pipeline started"
        );
        Ok(())
    }

    fn spawn_all(&mut self) -> Result<()> {
        for stage_idx in 0..self.stages.len() {
            let core = self.stages[stage_idx].core.clone();
            let total_threads = core.config().total_threads;
            let threads_per_batch = core.config().batching.threads_per_batch;
            let slots = core.batch_slots();
            for worker_idx in 0..total_threads {
                let batch_idx = (worker_idx / threads_per_batch).min(slots - 1);
                let ctx = WorkerContext {
                    core: core.clone(),
                    worker_idx,
                    batch_idx,
                };
                let worker = self.stages[stage_idx].node.create_worker(ctx.clone());
                let control = Arc::new(WorkerControl::new());
                let events = self.events_tx.clone();
                let thread_control = control.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("vidflow-{}-{}", core.name(), worker_idx))
                    .spawn(move || run_worker(ctx, worker, thread_control, events))?;
                self.controls.push(control);
                self.handles.push(handle);
            }
        }
        Ok(())
    }

    /// Stop every stage and join all worker threads. In-flight batches are
    /// abandoned once the workers have deinitialized.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::NotRunning);
        }
        self.shutdown();
        self.running = false;
        tracing::info!("pipeline stopped");
        Ok(())
    }

    /// Non-blocking drain of accumulated worker events.
    pub fn drain_events(&self) -> Vec<WorkerEvent> {
        self.events_rx.try_iter().collect()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn shutdown(&mut self) {
        // Stage stop flags first: wakes workers parked on empty ports.
        for stage in &self.stages {
            stage.core.stop_batching();
        }
        for control in self.controls.drain(..) {
            control.break_process_loop();
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }

    fn abort_spawned(&mut self) {
        for stage in &self.stages {
            stage.core.stop_batching();
        }
        for control in self.controls.drain(..) {
            control.break_process_loop();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.running {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("workers", &self.handles.len())
            .field("running", &self.running)
            .finish()
    }
}
