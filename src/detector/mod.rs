pub mod baseline;
pub mod classifier;
pub mod expiry;
pub mod pipeline;

pub use baseline::BaselineEngine;
pub use expiry::DealExpirer;
pub use pipeline::{DealPipeline, PipelineOutcome};
