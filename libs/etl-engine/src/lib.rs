pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod retry;
pub mod transform;

pub use batch::Batch;
pub use checkpoint::CheckpointStore;
pub use config::{PipelineConfig, RetryConfig};
pub use error::EngineError;
pub use extract::{Extraction, Extractor, ExtractorState};
pub use load::Loader;
pub use pipeline::{CycleStats, Pipeline, PipelineState};
pub use retry::{RetryError, RetryPolicy, retry};
pub use transform::transform;
