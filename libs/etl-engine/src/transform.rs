use std::num::IntErrorKind;

use etl_api::{DomainEvent, RawRecord, RejectReason, RejectedRecord};
use uuid::Uuid;

/// Map a raw log record to a DomainEvent, or classify why it cannot be one.
///
/// Wire format: key = UTF-8 `"<actor_uuid>:<subject_uuid>"`, value = UTF-8
/// decimal integer. The event time is the record timestamp, never the payload.
pub fn transform(record: RawRecord) -> Result<DomainEvent, RejectedRecord> {
    match validate(&record) {
        Ok(event) => Ok(event),
        Err(reason) => Err(RejectedRecord { record, reason }),
    }
}

fn validate(record: &RawRecord) -> Result<DomainEvent, RejectReason> {
    let (actor_id, subject_id) = parse_key(record.key.as_deref())?;
    let metric = parse_metric(record.value.as_deref())?;
    if record.event_time < 0 {
        return Err(RejectReason::MissingTimestamp);
    }
    Ok(DomainEvent {
        actor_id,
        subject_id,
        metric,
        event_time: record.event_time,
    })
}

fn parse_key(key: Option<&[u8]>) -> Result<(Uuid, Uuid), RejectReason> {
    let key = key.ok_or(RejectReason::MissingKey)?;
    let key = std::str::from_utf8(key).map_err(|_| RejectReason::KeyNotUtf8)?;

    let mut parts = key.split(':');
    let (Some(actor), Some(subject), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(RejectReason::MalformedKey(key.to_string()));
    };

    let actor_id =
        Uuid::parse_str(actor).map_err(|_| RejectReason::InvalidActorId(actor.to_string()))?;
    let subject_id =
        Uuid::parse_str(subject).map_err(|_| RejectReason::InvalidSubjectId(subject.to_string()))?;
    Ok((actor_id, subject_id))
}

fn parse_metric(value: Option<&[u8]>) -> Result<i32, RejectReason> {
    let value = value.ok_or(RejectReason::MissingValue)?;
    let text = std::str::from_utf8(value).map_err(|_| RejectReason::ValueNotUtf8)?;
    let text = text.trim();

    let n: i64 = text.parse().map_err(|e: std::num::ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
            RejectReason::ValueOutOfRange(text.to_string())
        }
        _ => RejectReason::NonNumericValue(text.to_string()),
    })?;
    if n < 0 {
        return Err(RejectReason::NegativeValue(n));
    }
    i32::try_from(n).map_err(|_| RejectReason::ValueOutOfRange(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTOR: &str = "11111111-1111-1111-1111-111111111111";
    const SUBJECT: &str = "22222222-2222-2222-2222-222222222222";

    fn record(key: Option<&str>, value: Option<&str>, ts: i64) -> RawRecord {
        RawRecord {
            topic: "views".into(),
            partition: 0,
            offset: 7,
            key: key.map(|k| k.as_bytes().to_vec()),
            value: value.map(|v| v.as_bytes().to_vec()),
            event_time: ts,
        }
    }

    fn reason(r: RawRecord) -> RejectReason {
        transform(r).unwrap_err().reason
    }

    #[test]
    fn valid_view_event() {
        let key = format!("{ACTOR}:{SUBJECT}");
        let event = transform(record(Some(&key), Some("42"), 1_700_000_000_000)).unwrap();
        assert_eq!(event.actor_id, Uuid::parse_str(ACTOR).unwrap());
        assert_eq!(event.subject_id, Uuid::parse_str(SUBJECT).unwrap());
        assert_eq!(event.metric, 42);
        assert_eq!(event.event_time, 1_700_000_000_000);
    }

    #[test]
    fn value_whitespace_is_tolerated() {
        let key = format!("{ACTOR}:{SUBJECT}");
        let event = transform(record(Some(&key), Some(" 17\n"), 5)).unwrap();
        assert_eq!(event.metric, 17);
    }

    #[test]
    fn missing_key_is_rejected_not_panicking() {
        let rejected = transform(record(None, Some("42"), 10)).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::MissingKey);
        assert_eq!(rejected.reason.to_string(), "missing key");
        assert_eq!(rejected.record.event_time, 10);
    }

    #[test]
    fn key_shape_violations() {
        assert_eq!(
            reason(record(Some(ACTOR), Some("1"), 1)),
            RejectReason::MalformedKey(ACTOR.into())
        );
        let three = format!("{ACTOR}:{SUBJECT}:3");
        assert_eq!(reason(record(Some(&three), Some("1"), 1)), RejectReason::MalformedKey(three));
        let bad_actor = format!("nope:{SUBJECT}");
        assert_eq!(
            reason(record(Some(&bad_actor), Some("1"), 1)),
            RejectReason::InvalidActorId("nope".into())
        );
        let bad_subject = format!("{ACTOR}:");
        assert_eq!(
            reason(record(Some(&bad_subject), Some("1"), 1)),
            RejectReason::InvalidSubjectId(String::new())
        );
    }

    #[test]
    fn key_must_be_utf8() {
        let mut r = record(None, Some("1"), 1);
        r.key = Some(vec![0xff, 0xfe, b':']);
        assert_eq!(reason(r), RejectReason::KeyNotUtf8);
    }

    #[test]
    fn value_violations() {
        let key = format!("{ACTOR}:{SUBJECT}");
        assert_eq!(reason(record(Some(&key), None, 1)), RejectReason::MissingValue);
        assert_eq!(
            reason(record(Some(&key), Some("4.5"), 1)),
            RejectReason::NonNumericValue("4.5".into())
        );
        assert_eq!(reason(record(Some(&key), Some("-3"), 1)), RejectReason::NegativeValue(-3));
        assert_eq!(
            reason(record(Some(&key), Some("3000000000"), 1)),
            RejectReason::ValueOutOfRange("3000000000".into())
        );
        assert_eq!(
            reason(record(Some(&key), Some("99999999999999999999"), 1)),
            RejectReason::ValueOutOfRange("99999999999999999999".into())
        );
    }

    #[test]
    fn timestamp_must_be_present() {
        let key = format!("{ACTOR}:{SUBJECT}");
        assert_eq!(reason(record(Some(&key), Some("1"), -1)), RejectReason::MissingTimestamp);
    }
}
