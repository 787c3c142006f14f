//! Pipeline driver: Source → Stage₁ → … → Stageₙ → Sink.
//!
//! # Execution modes
//!
//! - [`ExecutionMode::DataParallel`]: one driver thread walks every batch
//!   through the whole chain. Stages fan per-block work out over the worker
//!   pool and join before handing the batch on.
//! - [`ExecutionMode::StagePipelined`]: the source and every stage get their
//!   own thread, linked by bounded FIFO queues; the sink runs on the calling
//!   thread. Stage *i* works on batch *k* while stage *i-1* works on batch
//!   *k+1*. A full queue blocks its producer.
//!
//! In both modes batches reach the sink in stream order, and each stage sees
//! its batches one at a time, in order.

use std::thread::{self, Scope, ScopedJoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};

use crate::block::Batch;
use crate::config::PipelineConfig;
use crate::error::{ConfigError, PipelineError, PipelineResult};
use crate::handle::PipelineHandle;
use crate::sink::{ConsoleSink, Sink};
use crate::source::{SineSource, Source};
use crate::stage::{ProcessContext, Stage};
use crate::stages::standard_stages;
use crate::worker_pool::WorkerPool;

/// Batches each inter-stage queue holds before the producer blocks.
pub const DEFAULT_QUEUE_DEPTH: usize = 2;

/// How the driver spreads work over threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Per-block fan-out inside each stage, stages run one after another.
    DataParallel,

    /// One thread per stage, bounded queues in between.
    StagePipelined { queue_depth: usize },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::StagePipelined {
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Totals for one call to `run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Batches delivered to the sink
    pub batches: u64,
    /// Blocks delivered to the sink
    pub blocks: u64,
}

/// A source, an ordered chain of stages and a sink.
pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn Source>,
    stages: Vec<Box<dyn Stage>>,
    sink: Box<dyn Sink>,
    pool: WorkerPool,
    handle: PipelineHandle,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Sine source, gain, delay, console output on stdout.
    pub fn standard(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let source = SineSource::from_config(&config)?;
        let stages = standard_stages(&config)?;

        let mut builder = Self::builder(config).source(source);
        for stage in stages {
            builder = builder.boxed_stage(stage);
        }
        builder.sink(ConsoleSink::stdout()).build()
    }

    /// Handle for stopping and observing the pipeline from other threads.
    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Run until [`PipelineHandle::stop`] is called, then drain.
    ///
    /// Each run starts the stream over: the source and every stage are reset
    /// and batch numbering restarts at zero.
    pub fn run(&mut self, mode: ExecutionMode) -> PipelineResult<RunStats> {
        self.run_with_limit(mode, None)
    }

    /// Run until the source has produced `batches` batches (or stop is
    /// requested first), then drain.
    pub fn run_for(&mut self, mode: ExecutionMode, batches: u64) -> PipelineResult<RunStats> {
        self.run_with_limit(mode, Some(batches))
    }

    fn run_with_limit(
        &mut self,
        mode: ExecutionMode,
        limit: Option<u64>,
    ) -> PipelineResult<RunStats> {
        info!(
            "pipeline starting: {} stage(s), {:?}, {} worker(s), {} blocks of {} per batch",
            self.stages.len(),
            mode,
            self.pool.size(),
            self.config.blocks_per_batch(),
            self.config.block_len,
        );

        self.source.reset();
        for stage in &mut self.stages {
            stage.reset();
        }

        self.handle.begin_run();
        let result = match mode {
            ExecutionMode::DataParallel => self.run_data_parallel(limit),
            ExecutionMode::StagePipelined { queue_depth } => {
                self.run_stage_pipelined(queue_depth.max(1), limit)
            }
        };
        self.handle.end_run();

        match &result {
            Ok(stats) => info!(
                "pipeline stopped after {} batch(es), {} block(s)",
                stats.batches, stats.blocks
            ),
            Err(e) => error!("pipeline failed: {}", e),
        }
        result
    }

    // ───────────────────────────────────────────────────────────────
    // Data-parallel driver
    // ───────────────────────────────────────────────────────────────

    fn run_data_parallel(&mut self, limit: Option<u64>) -> PipelineResult<RunStats> {
        let Self {
            config,
            source,
            stages,
            sink,
            pool,
            handle,
        } = self;

        let handle: &PipelineHandle = handle;
        let ctx = ProcessContext::new(pool, config.block_len);
        let mut cursor = BatchCursor::new(config.batch_len(), limit);
        let mut tail = Tail::new(sink.as_mut(), handle);

        while cursor.should_continue(handle) {
            let batch = cursor.next(source.as_mut())?;
            let batch = process_chain(stages, &ctx, batch)?;
            tail.deliver(&batch)?;
        }

        debug!("source stopped, draining stages");
        for index in 0..stages.len() {
            let (head, rest) = stages.split_at_mut(index + 1);
            if let Some(batch) = head[index].flush(&ctx)? {
                let batch = process_chain(rest, &ctx, batch)?;
                tail.deliver(&batch)?;
            }
        }

        Ok(tail.stats)
    }

    // ───────────────────────────────────────────────────────────────
    // Stage-pipelined driver
    // ───────────────────────────────────────────────────────────────

    fn run_stage_pipelined(
        &mut self,
        queue_depth: usize,
        limit: Option<u64>,
    ) -> PipelineResult<RunStats> {
        let Self {
            config,
            source,
            stages,
            sink,
            pool,
            handle,
        } = self;

        let ctx = ProcessContext::new(pool, config.block_len);
        let cursor = BatchCursor::new(config.batch_len(), limit);
        let handle: &PipelineHandle = handle;

        thread::scope(|scope| -> PipelineResult<RunStats> {
            let mut workers = Vec::with_capacity(stages.len() + 1);
            let (head_tx, mut rx) = crossbeam_channel::bounded::<Batch>(queue_depth);

            let source: &mut dyn Source = source.as_mut();
            workers.push(spawn_worker(
                scope,
                handle,
                "blockflow-source".to_string(),
                move || feed(source, cursor, handle, head_tx),
            )?);

            for (index, stage) in stages.iter_mut().enumerate() {
                let (tx, next_rx) = crossbeam_channel::bounded::<Batch>(queue_depth);
                let upstream = std::mem::replace(&mut rx, next_rx);
                let name = format!("blockflow-stage-{}-{}", index, stage.name());
                let stage: &mut dyn Stage = stage.as_mut();

                workers.push(spawn_worker(scope, handle, name, move || {
                    drive_stage(stage, ctx, handle, upstream, tx)
                })?);
            }

            let mut tail = Tail::new(sink.as_mut(), handle);
            let sink_result = rx.iter().try_for_each(|batch| tail.deliver(&batch));
            if sink_result.is_err() {
                handle.fail();
            }
            // Unblocks any producer still waiting on the last queue
            drop(rx);

            let mut first_error = sink_result.err();
            for (name, worker) in workers {
                match worker.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => {
                        first_error.get_or_insert(PipelineError::ThreadPanicked { name });
                    }
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(tail.stats),
            }
        })
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    source: Option<Box<dyn Source>>,
    stages: Vec<Box<dyn Stage>>,
    sink: Option<Box<dyn Sink>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            source: None,
            stages: Vec::new(),
            sink: None,
        }
    }

    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Append a stage to the end of the chain.
    pub fn stage(self, stage: impl Stage + 'static) -> Self {
        self.boxed_stage(Box::new(stage))
    }

    pub fn boxed_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Validate the configuration and start the worker pool.
    pub fn build(self) -> PipelineResult<Pipeline> {
        self.config.validate()?;

        let source = self
            .source
            .ok_or(PipelineError::Incomplete { missing: "source" })?;
        let sink = self.sink.ok_or(PipelineError::Incomplete { missing: "sink" })?;

        if source.block_len() != self.config.block_len {
            return Err(PipelineError::BlockLength {
                stage: "source",
                expected: self.config.block_len,
                actual: source.block_len(),
            });
        }

        let pool = WorkerPool::new(self.config.workers)?;

        Ok(Pipeline {
            config: self.config,
            source,
            stages: self.stages,
            sink,
            pool,
            handle: PipelineHandle::new(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════
// Shared driver pieces
// ═══════════════════════════════════════════════════════════════════

/// Numbers source batches and stamps their stream position.
#[derive(Debug, Clone, Copy)]
struct BatchCursor {
    batch_len: usize,
    limit: Option<u64>,
    seq: u64,
    next_block: u64,
}

impl BatchCursor {
    fn new(batch_len: usize, limit: Option<u64>) -> Self {
        Self {
            batch_len,
            limit,
            seq: 0,
            next_block: 0,
        }
    }

    fn should_continue(&self, handle: &PipelineHandle) -> bool {
        !handle.is_stop_requested() && self.limit.is_none_or(|limit| self.seq < limit)
    }

    fn next(&mut self, source: &mut dyn Source) -> Result<Batch, ConfigError> {
        let blocks = source.produce(self.batch_len)?;
        let batch = Batch::new(self.seq, self.next_block, blocks);
        self.seq += 1;
        self.next_block = batch.end_block();
        Ok(batch)
    }
}

/// Sink end of the chain, with run totals.
struct Tail<'a> {
    sink: &'a mut dyn Sink,
    handle: &'a PipelineHandle,
    stats: RunStats,
    last_seq: Option<u64>,
}

impl<'a> Tail<'a> {
    fn new(sink: &'a mut dyn Sink, handle: &'a PipelineHandle) -> Self {
        Self {
            sink,
            handle,
            stats: RunStats::default(),
            last_seq: None,
        }
    }

    fn deliver(&mut self, batch: &Batch) -> PipelineResult<()> {
        debug_assert!(
            self.last_seq.is_none_or(|last| batch.seq > last),
            "batch {} delivered out of order",
            batch.seq
        );
        self.sink.consume(batch)?;

        self.last_seq = Some(batch.seq);
        self.stats.batches += 1;
        self.stats.blocks += batch.len() as u64;
        self.handle.record_emitted();
        Ok(())
    }
}

fn process_chain(
    stages: &mut [Box<dyn Stage>],
    ctx: &ProcessContext,
    batch: Batch,
) -> PipelineResult<Batch> {
    stages
        .iter_mut()
        .try_fold(batch, |batch, stage| stage.process(ctx, batch))
}

/// Marks the run failed if the owning thread unwinds.
struct FailOnPanic<'a>(&'a PipelineHandle);

impl Drop for FailOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.fail();
        }
    }
}

type Worker<'scope> = (String, ScopedJoinHandle<'scope, PipelineResult<()>>);

fn spawn_worker<'scope, 'env, F>(
    scope: &'scope Scope<'scope, 'env>,
    handle: &PipelineHandle,
    name: String,
    f: F,
) -> PipelineResult<Worker<'scope>>
where
    F: FnOnce() -> PipelineResult<()> + Send + 'scope,
{
    match thread::Builder::new().name(name.clone()).spawn_scoped(scope, f) {
        Ok(join) => Ok((name, join)),
        Err(source) => {
            handle.fail();
            Err(PipelineError::Spawn { name, source })
        }
    }
}

fn feed(
    source: &mut dyn Source,
    mut cursor: BatchCursor,
    handle: &PipelineHandle,
    tx: Sender<Batch>,
) -> PipelineResult<()> {
    let _guard = FailOnPanic(handle);

    while cursor.should_continue(handle) {
        let batch = match cursor.next(source) {
            Ok(batch) => batch,
            Err(e) => {
                handle.fail();
                return Err(e.into());
            }
        };
        if tx.send(batch).is_err() {
            // Downstream exited; it reports its own failure
            break;
        }
    }

    debug!("source stopped after {} batch(es)", cursor.seq);
    Ok(())
}

fn drive_stage(
    stage: &mut dyn Stage,
    ctx: ProcessContext,
    handle: &PipelineHandle,
    rx: Receiver<Batch>,
    tx: Sender<Batch>,
) -> PipelineResult<()> {
    let _guard = FailOnPanic(handle);

    let result = pump_stage(stage, &ctx, handle, &rx, &tx);
    if result.is_err() {
        handle.fail();
    }
    result
}

fn pump_stage(
    stage: &mut dyn Stage,
    ctx: &ProcessContext,
    handle: &PipelineHandle,
    rx: &Receiver<Batch>,
    tx: &Sender<Batch>,
) -> PipelineResult<()> {
    for batch in rx.iter() {
        if tx.send(stage.process(ctx, batch)?).is_err() {
            return Ok(());
        }
    }

    // Upstream closed: release carried state unless the run already failed
    if !handle.has_failed() {
        if let Some(batch) = stage.flush(ctx)? {
            debug!("stage '{}' flushed {} block(s)", stage.name(), batch.len());
            let _ = tx.send(batch);
        }
    }
    Ok(())
}
