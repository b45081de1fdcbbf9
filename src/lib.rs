//! # vidflow: node-based dataflow pipeline engine
//!
//! A typed, multi-threaded pipeline engine for video-analytics stages.
//! Stages are nodes connected by bounded ports; each stage runs a pool of
//! worker threads that pull batches from the stage's input ports, run user
//! processing code, and push resulting blobs downstream.
//!
//! ## Architecture
//!
//! ```text
//! [decode] ──port──► [infer] ──port──► [encode]
//!    │                  ▲
//!    └──────port────► [osd]
//! ```
//!
//! - **Buffer** — an owned payload plus optional metadata, with a release
//!   action for wrapped hardware resources (DMA fds, device surfaces).
//! - **Blob** — one unit of pipeline data: an ordered collection of typed
//!   buffers tagged with stream/frame identity and a timestamp.
//! - **Port** — a bounded mutex+condvar queue between stages with two
//!   explicit overflow policies (block vs. discard-newest).
//! - **Batching engine** — assembles one blob per input port into a batch,
//!   ignoring streams or grouping per stream.
//! - **Node / workers** — immutable stage metadata plus N worker threads,
//!   each with an `init`/`process`/`deinit` lifecycle.
//! - **Pipeline** — the composition layer: wiring, thread spawning, and
//!   graceful shutdown.
//!
//! ## Example
//!
//! ```no_run
//! use vidflow::{Node, NodeConfig, NodeWorker, Pipeline, WorkerContext};
//! use std::time::Duration;
//!
//! struct Passthrough;
//! struct PassthroughWorker { ctx: WorkerContext }
//!
//! impl Node for Passthrough {
//!     fn create_worker(&self, ctx: WorkerContext) -> Box<dyn NodeWorker> {
//!         Box::new(PassthroughWorker { ctx })
//!     }
//! }
//!
//! impl NodeWorker for PassthroughWorker {
//!     fn process(&mut self, batch_idx: usize) -> vidflow::Result<()> {
//!         for blob in self.ctx.core.get_batched_input_all(batch_idx) {
//!             let _ = self.ctx.core.send_output(blob, 0, Some(Duration::from_millis(50)));
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> vidflow::Result<()> {
//!     let mut pipeline = Pipeline::new();
//!     let a = pipeline.add_stage("a", Box::new(Passthrough), NodeConfig::default())?;
//!     let b = pipeline.add_stage("b", Box::new(Passthrough), NodeConfig::default())?;
//!     pipeline.link(a, 0, b, 0)?;
//!     pipeline.start()?;
//!     // ... feed blobs into stage a's input port ...
//!     pipeline.stop()
//! }
//! ```

pub mod batching;
pub mod blob;
pub mod buffer;
pub mod config;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod port;
pub mod worker;

// Re-export commonly used types
pub use batching::{BatchingConfig, BatchingEngine, BatchingFn, BatchingPolicy};
pub use blob::{Blob, BufferHandle};
pub use buffer::{Buffer, ReleaseFn};
pub use config::{LinkSpec, PipelineSpec, StageSpec};
pub use error::{Error, Result};
pub use node::{Node, NodeConfig, NodeCore, NodeWorker, WorkerContext};
pub use pipeline::{Pipeline, StageId};
pub use port::{ConvertFn, InPort, OutPort, OverflowPolicy, Status, DEFAULT_QUEUE_CAPACITY};
pub use worker::{WorkerControl, WorkerEvent};
