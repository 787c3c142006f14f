// src/main.rs

use blockflow::{ExecutionMode, Pipeline, PipelineConfig, PipelineError};
use log::{error, info, warn};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::default();
    info!(
        "{} Hz, {} samples per block, {} Hz sine, gain {}, delay {} ms",
        config.sample_rate, config.block_len, config.frequency, config.gain, config.delay_ms
    );

    let mut pipeline = match Pipeline::standard(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("invalid configuration: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = pipeline.handle().stop_on_signal() {
        warn!("no shutdown signal handler installed: {}", e);
    }

    match pipeline.run(ExecutionMode::default()) {
        Ok(_) => {}
        // Reader went away (e.g. piped into `head`)
        Err(PipelineError::Sink(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            info!("output closed, stopping");
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
