// src/stages/delay.rs
//
// Delay stage.
//
// Shifts the stream later in time by a whole number of samples, filling
// the exposed lead-in with silence.

use log::{debug, warn};

use crate::block::{Batch, Block};
use crate::error::{ConfigError, PipelineResult};
use crate::stage::{ProcessContext, Stage};

/// A delay expressed in samples and split along block boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayParams {
    /// Total delay in samples
    pub sample_offset: usize,
    /// Whole blocks of delay (`sample_offset / block_len`)
    pub block_offset: usize,
    /// Remaining sub-block delay (`sample_offset % block_len`)
    pub inner_offset: usize,
    pub block_len: usize,
}

impl DelayParams {
    /// Convert milliseconds to samples.
    ///
    /// Rounding policy: `sample_rate * delay_ms / 1000` is rounded to the
    /// nearest sample, halves away from zero. A fractional result is logged
    /// with the offset actually applied.
    pub fn from_ms(delay_ms: f64, sample_rate: u32, block_len: usize) -> Result<Self, ConfigError> {
        if !delay_ms.is_finite() || delay_ms < 0.0 {
            return Err(ConfigError::InvalidDelay { delay_ms });
        }
        if sample_rate == 0 {
            return Err(ConfigError::NonPositiveSampleRate);
        }

        let exact = sample_rate as f64 * delay_ms / 1000.0;
        let sample_offset = exact.round() as usize;
        if exact.fract() != 0.0 {
            warn!(
                "delay of {} ms at {} Hz is {} samples, rounded to {}",
                delay_ms, sample_rate, exact, sample_offset
            );
        }

        Self::from_samples(sample_offset, block_len)
    }

    pub fn from_samples(sample_offset: usize, block_len: usize) -> Result<Self, ConfigError> {
        if block_len == 0 {
            return Err(ConfigError::NonPositiveBlockLength);
        }
        Ok(Self {
            sample_offset,
            block_offset: sample_offset / block_len,
            inner_offset: sample_offset % block_len,
            block_len,
        })
    }

    /// Blocks the delay adds to a finite stream: `ceil(sample_offset / block_len)`.
    #[inline]
    pub fn extra_blocks(&self) -> usize {
        self.block_offset + usize::from(self.inner_offset != 0)
    }
}

/// Delay a finite run of blocks in one go.
///
/// The output holds `blocks.len() + params.extra_blocks()` blocks and starts
/// as silence. Input block `i` writes its head to block `i + block_offset`
/// and, when the offset is not block aligned, its tail to the start of the
/// following block.
pub fn delay_blocks(blocks: &[Block], params: &DelayParams) -> PipelineResult<Vec<Block>> {
    let n = params.block_len;
    let inner = params.inner_offset;
    for block in blocks {
        block.expect_len("delay", n)?;
    }

    let mut out: Vec<Block> = (0..blocks.len() + params.extra_blocks())
        .map(|_| Block::silent(n))
        .collect();

    for (i, block) in blocks.iter().enumerate() {
        let src = block.samples();
        let dst = i + params.block_offset;

        out[dst].samples_mut()[inner..].copy_from_slice(&src[..n - inner]);
        if inner != 0 {
            out[dst + 1].samples_mut()[..inner].copy_from_slice(&src[n - inner..]);
        }
    }

    Ok(out)
}

/// Streaming delay.
///
/// The stream is delayed once, at its start: the first batch is preceded by
/// `block_offset` silent blocks and every later batch comes out with as many
/// blocks as went in. The last `inner_offset` samples of each batch are
/// carried into the next call, and `flush` releases them as a final
/// zero-padded block.
pub struct DelayStage {
    params: DelayParams,

    /// Tail of the previous input block, silence before the stream starts
    carry: Vec<f32>,

    lead_in_done: bool,
    next_block: u64,
    next_seq: u64,
}

impl DelayStage {
    pub fn new(params: DelayParams) -> Self {
        Self {
            carry: vec![0.0; params.inner_offset],
            params,
            lead_in_done: false,
            next_block: 0,
            next_seq: 0,
        }
    }

    pub fn from_ms(delay_ms: f64, sample_rate: u32, block_len: usize) -> Result<Self, ConfigError> {
        Ok(Self::new(DelayParams::from_ms(delay_ms, sample_rate, block_len)?))
    }

    fn emit(&mut self, seq: u64, blocks: Vec<Block>) -> Batch {
        let batch = Batch::new(seq, self.next_block, blocks);
        self.next_block = batch.end_block();
        self.next_seq = seq + 1;
        batch
    }
}

/// Shift `block` right by `carry.len()` samples, filling the front from `carry`.
///
/// Reuses the block's own buffer.
fn splice(carry: &[f32], mut block: Block) -> Block {
    let inner = carry.len();
    let samples = block.samples_mut();
    let n = samples.len();
    samples.copy_within(0..n - inner, inner);
    samples[..inner].copy_from_slice(carry);
    block
}

impl Stage for DelayStage {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn process(&mut self, ctx: &ProcessContext, batch: Batch) -> PipelineResult<Batch> {
        batch.expect_block_len(self.name(), ctx.block_len)?;
        batch.expect_block_len(self.name(), self.params.block_len)?;

        let n = self.params.block_len;
        let inner = self.params.inner_offset;
        let Batch { seq, blocks, .. } = batch;

        let lead_in = if self.lead_in_done {
            0
        } else {
            self.params.block_offset
        };
        let mut out = Vec::with_capacity(lead_in + blocks.len());
        out.extend((0..lead_in).map(|_| Block::silent(n)));
        self.lead_in_done = true;

        if inner == 0 {
            out.extend(blocks);
        } else {
            // Pair every block with the tail of its predecessor; each output
            // block then depends only on its own pair.
            let mut pairs = Vec::with_capacity(blocks.len());
            for block in blocks {
                let tail = block.samples()[n - inner..].to_vec();
                let carry = std::mem::replace(&mut self.carry, tail);
                pairs.push((carry, block));
            }

            out.extend(ctx.pool.map(pairs, |(carry, block)| splice(&carry, block))?);
        }

        Ok(self.emit(seq, out))
    }

    fn flush(&mut self, _ctx: &ProcessContext) -> PipelineResult<Option<Batch>> {
        if !self.lead_in_done || self.params.inner_offset == 0 {
            self.reset();
            return Ok(None);
        }

        let mut last = Block::silent(self.params.block_len);
        last.samples_mut()[..self.carry.len()].copy_from_slice(&self.carry);

        let seq = self.next_seq;
        let batch = self.emit(seq, vec![last]);
        debug!(
            "delay flushed {} carried samples at block {}",
            self.params.inner_offset, batch.start_block
        );

        self.reset();
        Ok(Some(batch))
    }

    fn reset(&mut self) {
        self.carry.fill(0.0);
        self.lead_in_done = false;
        self.next_block = 0;
        self.next_seq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker_pool::WorkerPool;

    const BLOCK_LEN: usize = 8;

    /// Blocks whose samples hold their own 1-based global index.
    fn ramp(start_block: usize, count: usize) -> Vec<Block> {
        (start_block..start_block + count)
            .map(|b| {
                Block::new(
                    (0..BLOCK_LEN)
                        .map(|i| (b * BLOCK_LEN + i + 1) as f32)
                        .collect(),
                )
            })
            .collect()
    }

    fn flatten(blocks: &[Block]) -> Vec<f32> {
        blocks
            .iter()
            .flat_map(|b| b.samples().iter().copied())
            .collect()
    }

    /// Expected delayed stream: input sample `j - offset`, or silence.
    fn expected(total: usize, offset: usize) -> Vec<f32> {
        (0..total)
            .map(|j| if j < offset { 0.0 } else { (j - offset + 1) as f32 })
            .collect()
    }

    fn stream_through(
        stage: &mut DelayStage,
        workers: usize,
        batches: usize,
        per_batch: usize,
    ) -> Vec<Batch> {
        let pool = WorkerPool::new(workers).unwrap();
        let ctx = ProcessContext::new(&pool, BLOCK_LEN);

        let mut out = Vec::new();
        for seq in 0..batches {
            let batch = Batch::new(
                seq as u64,
                (seq * per_batch) as u64,
                ramp(seq * per_batch, per_batch),
            );
            out.push(stage.process(&ctx, batch).unwrap());
        }
        out.extend(stage.flush(&ctx).unwrap());
        out
    }

    #[test]
    fn test_params_from_ms() {
        let params = DelayParams::from_ms(100.0, 48_000, 480).unwrap();
        assert_eq!(params.sample_offset, 4800);
        assert_eq!(params.block_offset, 10);
        assert_eq!(params.inner_offset, 0);
        assert_eq!(params.extra_blocks(), 10);
    }

    #[test]
    fn test_params_round_to_nearest_sample() {
        // 44.1 samples rounds down, 44.541 rounds up
        let params = DelayParams::from_ms(1.0, 44_100, 64).unwrap();
        assert_eq!(params.sample_offset, 44);
        let params = DelayParams::from_ms(1.01, 44_100, 64).unwrap();
        assert_eq!(params.sample_offset, 45);
    }

    #[test]
    fn test_params_reject_negative_delay() {
        assert!(matches!(
            DelayParams::from_ms(-5.0, 48_000, 480),
            Err(ConfigError::InvalidDelay { .. })
        ));
        assert!(DelayParams::from_ms(f64::NAN, 48_000, 480).is_err());
    }

    #[test]
    fn test_one_shot_aligned_offset_adds_no_overflow_block() {
        let params = DelayParams::from_samples(2 * BLOCK_LEN, BLOCK_LEN).unwrap();
        let input = ramp(0, 5);
        let out = delay_blocks(&input, &params).unwrap();

        assert_eq!(out.len(), 5 + 2);
        assert_eq!(flatten(&out), expected(7 * BLOCK_LEN, 2 * BLOCK_LEN));
    }

    #[test]
    fn test_one_shot_unaligned_offset_adds_one_block() {
        let params = DelayParams::from_samples(2 * BLOCK_LEN + 3, BLOCK_LEN).unwrap();
        let input = ramp(0, 5);
        let out = delay_blocks(&input, &params).unwrap();

        assert_eq!(out.len(), 5 + 3);
        let flat = flatten(&out);
        let offset = params.sample_offset;
        assert_eq!(&flat[..offset + 5 * BLOCK_LEN], &expected(offset + 5 * BLOCK_LEN, offset)[..]);
        assert!(flat[offset + 5 * BLOCK_LEN..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_stream_is_continuous_across_batches() {
        for offset in [0, 3, BLOCK_LEN, 2 * BLOCK_LEN + 5, 7 * BLOCK_LEN - 1] {
            let params = DelayParams::from_samples(offset, BLOCK_LEN).unwrap();
            let mut stage = DelayStage::new(params);
            let out = stream_through(&mut stage, 3, 4, 5);

            let blocks: Vec<Block> = out.into_iter().flat_map(|b| b.blocks).collect();
            assert_eq!(blocks.len(), 4 * 5 + params.extra_blocks(), "offset {offset}");

            let flat = flatten(&blocks);
            let input_len = 4 * 5 * BLOCK_LEN;
            assert_eq!(
                &flat[..input_len + offset],
                &expected(input_len + offset, offset)[..],
                "offset {offset}"
            );
            assert!(flat[input_len + offset..].iter().all(|&s| s == 0.0));
        }
    }

    #[test]
    fn test_lead_in_is_emitted_once() {
        let params = DelayParams::from_samples(3 * BLOCK_LEN, BLOCK_LEN).unwrap();
        let mut stage = DelayStage::new(params);
        let out = stream_through(&mut stage, 2, 3, 4);

        // Aligned offset: no flush block
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].len(), 4 + 3);
        assert_eq!(out[1].len(), 4);
        assert_eq!(out[2].len(), 4);
    }

    #[test]
    fn test_batch_positions_are_contiguous() {
        let params = DelayParams::from_samples(BLOCK_LEN + 1, BLOCK_LEN).unwrap();
        let mut stage = DelayStage::new(params);
        let out = stream_through(&mut stage, 2, 3, 4);

        assert_eq!(out.len(), 4);
        let mut next = 0;
        for (i, batch) in out.iter().enumerate() {
            assert_eq!(batch.seq, i as u64);
            assert_eq!(batch.start_block, next);
            next = batch.end_block();
        }
    }

    #[test]
    fn test_single_batch_with_flush_matches_one_shot() {
        let params = DelayParams::from_samples(3 * BLOCK_LEN + 2, BLOCK_LEN).unwrap();
        let input = ramp(0, 6);
        let one_shot = delay_blocks(&input, &params).unwrap();

        let mut stage = DelayStage::new(params);
        let out = stream_through(&mut stage, 2, 1, 6);
        let streamed: Vec<Block> = out.into_iter().flat_map(|b| b.blocks).collect();

        assert_eq!(streamed, one_shot);
    }

    #[test]
    fn test_worker_count_does_not_change_output() {
        let params = DelayParams::from_samples(BLOCK_LEN + 5, BLOCK_LEN).unwrap();

        let serial = stream_through(&mut DelayStage::new(params), 1, 3, 9);
        let parallel = stream_through(&mut DelayStage::new(params), 6, 3, 9);
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_reset_restarts_the_stream() {
        let params = DelayParams::from_samples(BLOCK_LEN + 2, BLOCK_LEN).unwrap();
        let mut stage = DelayStage::new(params);

        let first = stream_through(&mut stage, 2, 2, 3);
        let second = stream_through(&mut stage, 2, 2, 3);
        assert_eq!(first, second);
    }
}
