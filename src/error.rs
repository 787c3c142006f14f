// src/error.rs
//
// Error types for configuration and pipeline execution.

use thiserror::Error;

/// Invalid static parameters, detected before the pipeline starts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sample rate must be positive")]
    NonPositiveSampleRate,

    #[error("block length must be positive")]
    NonPositiveBlockLength,

    #[error("batch of {batch_len} samples is not a multiple of block length {block_len}")]
    BatchNotBlockAligned { batch_len: usize, block_len: usize },

    #[error("delay must be a finite, non-negative number of milliseconds (got {delay_ms})")]
    InvalidDelay { delay_ms: f64 },

    #[error("{field} must be finite (got {value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("worker pool needs at least one worker")]
    NoWorkers,
}

/// Fatal conditions that stop a running pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage received a block that breaks the fixed block length.
    #[error("stage '{stage}' received a block of {actual} samples, expected {expected}")]
    BlockLength {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("a worker pool job panicked")]
    WorkerPanicked,

    #[error("worker pool is shut down")]
    WorkerPoolClosed,

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pipeline thread '{name}' panicked")]
    ThreadPanicked { name: String },

    #[error("sink write failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("pipeline is missing a {missing}")]
    Incomplete { missing: &'static str },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
