// src/lib.rs
//
// Block-based DSP pipeline: a synthetic source, a chain of swappable
// stages and a sink, driven across multiple cores.

mod block;
mod config;
mod error;
mod handle;
mod pipeline;
mod sink;
mod source;
mod stage;
mod stages;
mod worker_pool;

// Re-export key types for Rust consumers
pub use block::{Batch, Block};
pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, PipelineResult};
pub use handle::PipelineHandle;
pub use pipeline::{DEFAULT_QUEUE_DEPTH, ExecutionMode, Pipeline, PipelineBuilder, RunStats};
pub use sink::{ConsoleSink, Sink};
pub use source::{SineSource, Source};
pub use stage::{ProcessContext, Stage};
pub use stages::{DelayParams, DelayStage, GainStage, apply_gain, delay_blocks, standard_stages};
pub use worker_pool::WorkerPool;
