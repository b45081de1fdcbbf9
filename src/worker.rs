//! Engine-owned worker loop.
//!
//! Each worker thread runs [`run_worker`]: `init` the stage worker, loop on
//! `process` until the stage or this worker is told to stop, then `deinit`.
//! `deinit` always runs — including after a failed `init` or a `process`
//! error — so hardware resources acquired in `init` are never stranded.
//!
//! Lifecycle and failure events flow back to the pipeline over a crossbeam
//! channel; the worker never blocks on reporting.

use crate::node::{NodeWorker, WorkerContext};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};

/// Per-worker stop flag. The pipeline holds one per spawned thread so a
/// single worker can be broken out of its loop independently of the stage.
#[derive(Debug, Default)]
pub struct WorkerControl {
    stop: AtomicBool,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the worker leave its process loop after the current
    /// iteration.
    pub fn break_process_loop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Lifecycle notifications emitted by worker threads.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// `init` succeeded; the worker entered its process loop.
    Started { stage: String, worker: usize },
    /// `init` failed; the worker never entered its loop. `deinit` still ran.
    InitFailed {
        stage: String,
        worker: usize,
        message: String,
    },
    /// `process` returned an error; the worker left its loop.
    ProcessError {
        stage: String,
        worker: usize,
        message: String,
    },
    /// The worker exited and `deinit` completed.
    Stopped { stage: String, worker: usize },
}

/// Drive one stage worker for the lifetime of its thread.
pub fn run_worker(
    ctx: WorkerContext,
    mut worker: Box<dyn NodeWorker>,
    control: std::sync::Arc<WorkerControl>,
    events: Sender<WorkerEvent>,
) {
    let stage = ctx.core.name().to_string();
    let worker_idx = ctx.worker_idx;

    if let Err(e) = worker.init() {
        tracing::error!(stage = %stage, worker = worker_idx, error = %e, "worker init failed");
        // Partial state acquired before the failure still gets released.
        worker.deinit();
        let _ = events.try_send(WorkerEvent::InitFailed {
            stage,
            worker: worker_idx,
            message: e.to_string(),
        });
        return;
    }

    tracing::info!(stage = %stage, worker = worker_idx, batch = ctx.batch_idx, "worker started");
    let _ = events.try_send(WorkerEvent::Started {
        stage: stage.clone(),
        worker: worker_idx,
    });

    while !control.is_stopped() && !ctx.core.is_stopped() {
        if let Err(e) = worker.process(ctx.batch_idx) {
            tracing::error!(stage = %stage, worker = worker_idx, error = %e, "process failed");
            let _ = events.try_send(WorkerEvent::ProcessError {
                stage: stage.clone(),
                worker: worker_idx,
                message: e.to_string(),
            });
            break;
        }
    }

    worker.deinit();
    tracing::info!(stage = %stage, worker = worker_idx, "worker stopped");
    let _ = events.try_send(WorkerEvent::Stopped {
        stage,
        worker: worker_idx,
    });
}
