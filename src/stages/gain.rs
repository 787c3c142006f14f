// src/stages/gain.rs
//
// Gain stage.

use crate::block::{Batch, Block};
use crate::config::check_finite;
use crate::error::{ConfigError, PipelineResult};
use crate::stage::{ProcessContext, Stage};

/// Scales every sample by a fixed linear factor.
///
/// Each block's result depends only on that block, so blocks are fanned
/// out over the pool with no ordering concerns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainStage {
    gain: f32,
}

impl GainStage {
    /// Any finite factor is accepted, including negative and > 1. No clipping.
    pub fn new(gain: f32) -> Result<Self, ConfigError> {
        check_finite("gain", gain)?;
        Ok(Self { gain })
    }

}

/// Scale one block in place.
#[inline]
pub fn apply_gain(block: &mut Block, gain: f32) {
    for sample in block.samples_mut() {
        *sample *= gain;
    }
}

impl Stage for GainStage {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn process(&mut self, ctx: &ProcessContext, batch: Batch) -> PipelineResult<Batch> {
        batch.expect_block_len(self.name(), ctx.block_len)?;

        let gain = self.gain;
        let Batch {
            seq,
            start_block,
            blocks,
        } = batch;

        let blocks = ctx.pool.map(blocks, move |mut block| {
            apply_gain(&mut block, gain);
            block
        })?;

        Ok(Batch::new(seq, start_block, blocks))
    }
}
