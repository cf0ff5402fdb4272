use std::fmt;

/// Category of a collaborator error. Lets the engine decide between
/// retrying, skipping a record and failing fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid configuration. Permanent, fail at startup.
    Config,
    /// Broker / store / checkpoint unreachable. Transient, retried.
    Io,
    /// Undecodable data: skip the record.
    Format,
    /// Target store rejected the schema. Fatal.
    Schema,
    /// Logical error (invalid state, generic).
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Format => f.write_str("format"),
            ErrorKind::Schema => f.write_str("schema"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Error returned by every capability trait method (log, store, checkpoint).
#[derive(Clone, PartialEq, Eq)]
pub struct EtlError {
    kind: ErrorKind,
    message: String,
}

impl EtlError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Format, message: msg.into() }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Schema, message: msg.into() }
    }

    pub fn logic(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Logic, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Only connectivity failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Io
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Debug for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EtlError {}

// ---------------------------------------------------------------------------
// From impls: serialization errors → EtlError::Format
// ---------------------------------------------------------------------------

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self {
        Self::format(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_is_transient() {
        assert!(EtlError::io("down").is_transient());
        assert!(!EtlError::schema("bad column").is_transient());
        assert!(!EtlError::format("garbage").is_transient());
        assert!(!EtlError::config("no host").is_transient());
    }

    #[test]
    fn context_keeps_kind() {
        let e = EtlError::schema("column metric has type String").with_context("table shard.views");
        assert_eq!(e.kind(), ErrorKind::Schema);
        assert_eq!(e.message(), "table shard.views: column metric has type String");
        assert_eq!(e.to_string(), "schema: table shard.views: column metric has type String");
    }

    #[test]
    fn json_errors_are_format() {
        let err: EtlError = serde_json::from_str::<i64>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
