// src/sink.rs
//
// Sinks at the tail of the pipeline.

use std::io::{self, BufWriter, Stdout, Write};

use crate::block::Batch;
use crate::error::PipelineResult;

/// Consumes processed batches in stream order.
///
/// A sink only reads blocks; it never mutates or keeps them.
pub trait Sink: Send {
    fn consume(&mut self, batch: &Batch) -> PipelineResult<()>;
}

/// Renders each block as one line of comma-separated samples, followed by
/// a block count line per batch.
pub struct ConsoleSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl ConsoleSink<BufWriter<Stdout>> {
    pub fn stdout() -> Self {
        Self::new(BufWriter::new(io::stdout()))
    }
}

impl<W: Write + Send> Sink for ConsoleSink<W> {
    fn consume(&mut self, batch: &Batch) -> PipelineResult<()> {
        for block in &batch.blocks {
            let mut samples = block.samples().iter();
            if let Some(first) = samples.next() {
                write!(self.out, "{}", first)?;
            }
            for sample in samples {
                write!(self.out, ", {}", sample)?;
            }
            writeln!(self.out)?;
        }
        writeln!(self.out, "Number of Blocks: {}", batch.len())?;
        self.out.flush()?;
        Ok(())
    }
}
