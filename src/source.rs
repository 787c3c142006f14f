// src/source.rs
//
// Signal sources feeding the head of the pipeline.

use std::f64::consts::TAU;

use crate::block::Block;
use crate::config::{PipelineConfig, check_finite};
use crate::error::ConfigError;

/// Produces an unbounded, ordered stream of blocks.
pub trait Source: Send {
    /// Fixed block length of every produced block.
    fn block_len(&self) -> usize;

    /// Produce the next `sample_count` samples as blocks.
    ///
    /// `sample_count` must be a multiple of `block_len`.
    fn produce(&mut self, sample_count: usize) -> Result<Vec<Block>, ConfigError>;

    /// Rewind to the start of the stream.
    fn reset(&mut self) {}
}

/// Sine generator: `amplitude * sin(2π * frequency * t)`.
///
/// `t` is derived from the global sample index on every sample rather than
/// accumulated, so successive calls are phase-continuous without drift.
pub struct SineSource {
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    block_len: usize,

    /// Global index of the next sample
    position: u64,
}

impl SineSource {
    pub fn new(
        frequency: f32,
        amplitude: f32,
        sample_rate: u32,
        block_len: usize,
    ) -> Result<Self, ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::NonPositiveSampleRate);
        }
        if block_len == 0 {
            return Err(ConfigError::NonPositiveBlockLength);
        }
        check_finite("frequency", frequency)?;
        check_finite("amplitude", amplitude)?;

        Ok(Self {
            frequency,
            amplitude,
            sample_rate,
            block_len,
            position: 0,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.frequency,
            config.amplitude,
            config.sample_rate,
            config.block_len,
        )
    }

    #[inline]
    fn sample_at(&self, index: u64) -> f32 {
        let t = index as f64 / self.sample_rate as f64;
        (self.amplitude as f64 * (TAU * self.frequency as f64 * t).sin()) as f32
    }
}

impl Source for SineSource {
    fn block_len(&self) -> usize {
        self.block_len
    }

    fn produce(&mut self, sample_count: usize) -> Result<Vec<Block>, ConfigError> {
        if sample_count % self.block_len != 0 {
            return Err(ConfigError::BatchNotBlockAligned {
                batch_len: sample_count,
                block_len: self.block_len,
            });
        }

        let blocks = (0..sample_count / self.block_len)
            .map(|_| {
                let start = self.position;
                self.position += self.block_len as u64;
                Block::new(
                    (start..self.position)
                        .map(|index| self.sample_at(index))
                        .collect(),
                )
            })
            .collect();

        Ok(blocks)
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}
