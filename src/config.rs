// src/config.rs
//
// Static pipeline configuration, fixed at startup.

use crate::error::ConfigError;

// Reference setup
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BLOCK_LEN: usize = 480;
pub const DEFAULT_FREQUENCY: f32 = 1000.0;
pub const DEFAULT_AMPLITUDE: f32 = 1.0;
pub const DEFAULT_GAIN: f32 = 10.0;
pub const DEFAULT_DELAY_MS: f64 = 100.0;
pub const FALLBACK_WORKERS: usize = 4;

/// Configuration for one pipeline instance.
///
/// Passed explicitly to every source and stage constructor, so pipelines
/// with different parameters can coexist.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Sample rate in Hz. One batch holds one second of audio.
    pub sample_rate: u32,
    /// Samples per block
    pub block_len: usize,
    /// Sine source frequency in Hz
    pub frequency: f32,
    /// Sine source peak amplitude
    pub amplitude: f32,
    /// Linear gain factor
    pub gain: f32,
    /// Delay in milliseconds
    pub delay_ms: f64,
    /// Worker pool size
    pub workers: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_len: DEFAULT_BLOCK_LEN,
            frequency: DEFAULT_FREQUENCY,
            amplitude: DEFAULT_AMPLITUDE,
            gain: DEFAULT_GAIN,
            delay_ms: DEFAULT_DELAY_MS,
            workers: default_workers(),
        }
    }
}

impl PipelineConfig {
    /// Samples per batch (one second of audio).
    #[inline]
    pub fn batch_len(&self) -> usize {
        self.sample_rate as usize
    }

    /// Blocks per batch. Only meaningful once `validate` has passed.
    #[inline]
    pub fn blocks_per_batch(&self) -> usize {
        self.batch_len() / self.block_len.max(1)
    }

    /// Check every parameter. A pipeline never starts on a failed check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::NonPositiveSampleRate);
        }
        if self.block_len == 0 {
            return Err(ConfigError::NonPositiveBlockLength);
        }
        if self.batch_len() % self.block_len != 0 {
            return Err(ConfigError::BatchNotBlockAligned {
                batch_len: self.batch_len(),
                block_len: self.block_len,
            });
        }
        if !self.delay_ms.is_finite() || self.delay_ms < 0.0 {
            return Err(ConfigError::InvalidDelay {
                delay_ms: self.delay_ms,
            });
        }
        check_finite("frequency", self.frequency)?;
        check_finite("amplitude", self.amplitude)?;
        check_finite("gain", self.gain)?;
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}

pub(crate) fn check_finite(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite {
            field,
            value: value as f64,
        })
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}
