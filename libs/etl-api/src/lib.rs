pub mod checkpoint;
pub mod error;
pub mod log;
pub mod record;
pub mod store;
pub mod util;

pub use checkpoint::{CheckpointBackend, checkpoint_key};
pub use error::{ErrorKind, EtlError};
pub use log::{LogClient, SeekTarget};
pub use record::{Checkpoint, DomainEvent, RawRecord, RejectReason, RejectedRecord};
pub use store::EventStore;
pub use util::{datetime_from_ms, now_ms};
