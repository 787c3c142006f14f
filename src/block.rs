// src/block.rs
//
// Blocks and batches: the units of transport between pipeline components.

use crate::error::{PipelineError, PipelineResult};

/// Fixed-length run of mono samples.
///
/// A block is owned by exactly one component at a time. Stages either
/// mutate a block they own or build a new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    samples: Vec<f32>,
}

impl Block {
    /// Create a block wrapping existing samples.
    #[inline]
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    /// Create a block of `len` zero samples.
    #[inline]
    pub fn silent(len: usize) -> Self {
        Self {
            samples: vec![0.0; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Check the block against the pipeline's fixed block length.
    ///
    /// A mismatch means some stage broke its contract; it is never
    /// repaired by truncating or padding.
    #[inline]
    pub fn expect_len(&self, stage: &'static str, expected: usize) -> PipelineResult<()> {
        if self.samples.len() == expected {
            Ok(())
        } else {
            Err(PipelineError::BlockLength {
                stage,
                expected,
                actual: self.samples.len(),
            })
        }
    }
}

impl From<Vec<f32>> for Block {
    fn from(samples: Vec<f32>) -> Self {
        Self::new(samples)
    }
}

/// Ordered group of blocks handled as one pipeline generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Batch number since stream start, strictly increasing at the sink.
    pub seq: u64,

    /// Global stream index of the first block in `blocks`.
    pub start_block: u64,

    pub blocks: Vec<Block>,
}

impl Batch {
    pub fn new(seq: u64, start_block: u64, blocks: Vec<Block>) -> Self {
        Self {
            seq,
            start_block,
            blocks,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Global index one past the last block in this batch.
    #[inline]
    pub fn end_block(&self) -> u64 {
        self.start_block + self.blocks.len() as u64
    }

    /// Check every block against the pipeline's fixed block length.
    pub fn expect_block_len(&self, stage: &'static str, expected: usize) -> PipelineResult<()> {
        self.blocks
            .iter()
            .try_for_each(|block| block.expect_len(stage, expected))
    }

    /// Flatten the batch into one contiguous run of samples.
    pub fn to_samples(&self) -> Vec<f32> {
        self.blocks
            .iter()
            .flat_map(|block| block.samples().iter().copied())
            .collect()
    }
}
