// src/worker_pool.rs
//
// Long-lived worker pool for per-block fan-out inside a stage.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};

use crate::error::{ConfigError, PipelineError, PipelineResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads.
///
/// Threads live as long as the pool and are joined when it is dropped.
/// Work is handed over by value, so a worker always owns the data it
/// touches.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> PipelineResult<Self> {
        if size == 0 {
            return Err(ConfigError::NoWorkers.into());
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let mut pool = Self {
            job_tx: Some(job_tx),
            workers: Vec::with_capacity(size),
        };

        for index in 0..size {
            let name = format!("blockflow-worker-{index}");
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(rx))
                .map_err(|source| PipelineError::Spawn { name, source })?;
            pool.workers.push(handle);
        }

        debug!("worker pool started with {} threads", size);
        Ok(pool)
    }

    /// Number of worker threads.
    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Apply `f` to every item on the pool and return results in input order.
    ///
    /// Blocks until every item has been processed. Results are slotted by
    /// input index, so completion order never leaks into the output.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> PipelineResult<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let count = items.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let job_tx = self.job_tx.as_ref().ok_or(PipelineError::WorkerPoolClosed)?;
        let f = Arc::new(f);

        // Sized for every result so a worker never blocks on send
        let (result_tx, result_rx) = crossbeam_channel::bounded::<(usize, R)>(count);

        for (index, item) in items.into_iter().enumerate() {
            let f = Arc::clone(&f);
            let result_tx = result_tx.clone();
            job_tx
                .send(Box::new(move || {
                    let _ = result_tx.send((index, f(item)));
                }))
                .map_err(|_| PipelineError::WorkerPoolClosed)?;
        }
        drop(result_tx);

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(count).collect();
        for _ in 0..count {
            // Every sender gone before all results arrived means a job panicked
            let (index, value) = result_rx
                .recv()
                .map_err(|_| PipelineError::WorkerPanicked)?;
            slots[index] = Some(value);
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or(PipelineError::WorkerPanicked))
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets every worker fall out of its loop
        self.job_tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread exited with a panic");
            }
        }
        debug!("worker pool stopped");
    }
}

fn worker_loop(rx: Receiver<Job>) {
    for job in rx.iter() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(
                "job panicked on {}",
                thread::current().name().unwrap_or("worker")
            );
        }
    }
}
