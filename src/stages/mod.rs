// src/stages/mod.rs
//
// Standard stage types for the pipeline.

mod delay;
mod gain;

pub use delay::*;
pub use gain::*;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::stage::Stage;

/// Build the reference chain for `config`: gain, then delay.
pub fn standard_stages(config: &PipelineConfig) -> Result<Vec<Box<dyn Stage>>, ConfigError> {
    Ok(vec![
        Box::new(GainStage::new(config.gain)?),
        Box::new(DelayStage::from_ms(
            config.delay_ms,
            config.sample_rate,
            config.block_len,
        )?),
    ])
}
