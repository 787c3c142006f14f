//! Thread-safe control and readback for a running pipeline.
//!
//! The thread driving [`Pipeline::run`](crate::Pipeline::run) owns the
//! pipeline itself. Any other thread holds a [`PipelineHandle`] to request
//! shutdown and to watch progress.
//!
//! ```ignore
//! let handle = pipeline.handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(Duration::from_secs(5));
//!     handle.stop();
//! });
//! pipeline.run(ExecutionMode::default())?;
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use log::{info, warn};

/// Lock-free state shared between the pipeline and its handles.
#[derive(Debug)]
struct SharedState {
    stop_requested: AtomicBool,
    failed: AtomicBool,
    batches_emitted: AtomicU64,
}

/// Cloneable handle to a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    shared: Arc<SharedState>,
}

impl PipelineHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(SharedState {
                stop_requested: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                batches_emitted: AtomicU64::new(0),
            }),
        }
    }

    /// Ask the pipeline to stop.
    ///
    /// The source stops producing, in-flight batches drain to the sink and
    /// every thread is joined before `run` returns.
    pub fn stop(&self) {
        self.request_stop();
    }

    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Batches delivered to the sink so far, across all runs.
    #[inline]
    pub fn batches_emitted(&self) -> u64 {
        self.shared.batches_emitted.load(Ordering::Relaxed)
    }

    /// Stop on SIGINT or SIGTERM.
    ///
    /// The first signal drains the pipeline like [`stop`](Self::stop). A
    /// second one, arriving while the drain is still running, exits the
    /// process at once. Only one handler can be installed per process.
    pub fn stop_on_signal(&self) -> Result<(), ctrlc::Error> {
        let handle = self.clone();
        ctrlc::set_handler(move || {
            if handle.request_stop() {
                info!(
                    "shutdown requested after {} batch(es), draining",
                    handle.batches_emitted()
                );
            } else {
                warn!("second shutdown signal, exiting without drain");
                std::process::exit(130);
            }
        })
    }

    /// Returns `false` if a stop was already pending.
    fn request_stop(&self) -> bool {
        !self.shared.stop_requested.swap(true, Ordering::AcqRel)
    }

    // ───────────────────────────────────────────────────────────────
    // Pipeline side
    // ───────────────────────────────────────────────────────────────

    pub(crate) fn begin_run(&self) {
        self.shared.failed.store(false, Ordering::SeqCst);
    }

    /// A stop requested before `run` is honoured; one left over from a
    /// finished run is not.
    pub(crate) fn end_run(&self) {
        self.shared.stop_requested.store(false, Ordering::Release);
    }

    /// Mark the run as failed and stop the source.
    ///
    /// Stages seeing their input close after a failure skip `flush`.
    pub(crate) fn fail(&self) {
        self.shared.failed.store(true, Ordering::SeqCst);
        self.stop();
    }

    #[inline]
    pub(crate) fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::SeqCst)
    }

    pub(crate) fn record_emitted(&self) {
        self.shared.batches_emitted.fetch_add(1, Ordering::Relaxed);
    }
}
