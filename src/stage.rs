// src/stage.rs

use crate::block::Batch;
use crate::error::PipelineResult;
use crate::worker_pool::WorkerPool;

/// Context passed to stages on every call.
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    /// Pool for per-block fan-out
    pub pool: &'a WorkerPool,

    /// Fixed block length for this pipeline
    pub block_len: usize,
}

impl<'a> ProcessContext<'a> {
    pub fn new(pool: &'a WorkerPool, block_len: usize) -> Self {
        Self { pool, block_len }
    }
}

/// Core transform trait.
///
/// Stages:
/// - take ownership of an ordered batch and return an ordered batch
/// - are called with successive batches in stream order, one call at a time
/// - may fan work out over `ctx.pool`, but must join before returning
/// - own any carry-over state exclusively
pub trait Stage: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Transform one batch.
    ///
    /// Every incoming block must have exactly `ctx.block_len` samples; a
    /// stage reports `PipelineError::BlockLength` instead of repairing it.
    fn process(&mut self, ctx: &ProcessContext, batch: Batch) -> PipelineResult<Batch>;

    /// Emit whatever is still buffered once the input stream has ended.
    fn flush(&mut self, _ctx: &ProcessContext) -> PipelineResult<Option<Batch>> {
        Ok(None)
    }

    /// Drop carry-over state and start again from stream position zero.
    fn reset(&mut self) {}
}
