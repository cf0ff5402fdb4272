//! In-memory collaborators for the ETL pipeline.
//!
//! Each type implements one capability trait from `etl-api` and adds
//! fault injection plus inspection helpers, so the engine can be exercised
//! without a broker, an analytical store or a key/value service.

mod checkpoint;
mod log;
mod store;

pub use checkpoint::MemoryCheckpoints;
pub use log::MemoryLog;
pub use store::MemoryEventStore;
