use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ════════════════════════════════════════════════════════════════
//  RawRecord
// ════════════════════════════════════════════════════════════════

/// One record as delivered by the log. Immutable; `offset` grows strictly
/// within a partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Absent keys are legal on the wire and rejected by the transformer.
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    /// Broker timestamp, Unix ms. Negative when the broker has none.
    pub event_time: i64,
}

// ════════════════════════════════════════════════════════════════
//  DomainEvent
// ════════════════════════════════════════════════════════════════

/// Validated view event: who (`actor_id`) watched what (`subject_id`)
/// for how long (`metric`, seconds).
///
/// Only the transformer builds these, so `metric >= 0` always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub actor_id: Uuid,
    pub subject_id: Uuid,
    pub metric: i32,
    /// Unix ms, taken from the record timestamp.
    pub event_time: i64,
}

// ════════════════════════════════════════════════════════════════
//  RejectedRecord
// ════════════════════════════════════════════════════════════════

/// Why a raw record could not become a DomainEvent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    MissingKey,
    KeyNotUtf8,
    /// Key is not of the form `<actor_id>:<subject_id>`.
    MalformedKey(String),
    InvalidActorId(String),
    InvalidSubjectId(String),
    MissingValue,
    ValueNotUtf8,
    NonNumericValue(String),
    NegativeValue(i64),
    ValueOutOfRange(String),
    MissingTimestamp,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingKey => f.write_str("missing key"),
            RejectReason::KeyNotUtf8 => f.write_str("key is not valid UTF-8"),
            RejectReason::MalformedKey(k) => write!(f, "malformed key '{k}'"),
            RejectReason::InvalidActorId(s) => write!(f, "invalid actor id '{s}'"),
            RejectReason::InvalidSubjectId(s) => write!(f, "invalid subject id '{s}'"),
            RejectReason::MissingValue => f.write_str("missing value"),
            RejectReason::ValueNotUtf8 => f.write_str("value is not valid UTF-8"),
            RejectReason::NonNumericValue(v) => write!(f, "non-numeric value '{v}'"),
            RejectReason::NegativeValue(v) => write!(f, "negative value {v}"),
            RejectReason::ValueOutOfRange(v) => write!(f, "value out of range '{v}'"),
            RejectReason::MissingTimestamp => f.write_str("missing timestamp"),
        }
    }
}

/// A raw record that failed validation. Never reaches the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedRecord {
    pub record: RawRecord,
    pub reason: RejectReason,
}

// ════════════════════════════════════════════════════════════════
//  Checkpoint
// ════════════════════════════════════════════════════════════════

/// Last event time a pipeline has fully disposed of.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub pipeline_id: String,
    pub last_event_time: i64,
}

impl Checkpoint {
    pub fn new(pipeline_id: impl Into<String>, last_event_time: i64) -> Self {
        Self { pipeline_id: pipeline_id.into(), last_event_time }
    }

    /// Move forward to `event_time` if it is newer. Returns whether the
    /// value changed; older times are ignored so the value never goes back.
    pub fn advance(&mut self, event_time: i64) -> bool {
        if event_time > self.last_event_time {
            self.last_event_time = event_time;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_never_moves_back() {
        let mut cp = Checkpoint::new("views", 100);
        assert!(!cp.advance(50));
        assert!(!cp.advance(100));
        assert_eq!(cp.last_event_time, 100);
        assert!(cp.advance(101));
        assert_eq!(cp.last_event_time, 101);
    }

    #[test]
    fn reject_reason_text() {
        assert_eq!(RejectReason::MissingKey.to_string(), "missing key");
        assert_eq!(
            RejectReason::NonNumericValue("abc".into()).to_string(),
            "non-numeric value 'abc'"
        );
    }
}
