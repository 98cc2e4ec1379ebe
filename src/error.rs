//! Error types for ingestion, storage, and queries.
//!
//! Per-record and per-key failures never travel through these types to the top
//! of a run or query; they are logged and counted where they happen. What does
//! propagate is document-level (`IngestError`), connectivity-level
//! (`StoreError`), or a failed query precondition (`QueryError`).

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the key-value engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection refused, dropped, or the engine answered with an I/O-level error.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The engine answered with something the adapter did not expect.
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_dropped()
            || e.is_connection_refusal()
            || e.is_timeout()
        {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Protocol(e.to_string())
        }
    }
}

/// Failure persisting a single record. The run continues with the next one.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("flight {flight_number}: invalid departure time {departure_time:?}: {source}")]
    InvalidTimestamp {
        flight_number: String,
        departure_time: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("flight {flight_number}: serialization failed: {source}")]
    SerializationFailed {
        flight_number: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("push to {key} failed: {source}")]
    StoreWriteFailed {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Failure of a whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("feed unreachable: {0}")]
    FeedUnreachable(String),
    #[error("feed malformed: {0}")]
    FeedMalformed(String),
    #[error("ingestion run cancelled after {written} writes")]
    Cancelled { written: u64 },
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        // Body read errors surface through the byte stream as io errors.
        IngestError::FeedUnreachable(e.to_string())
    }
}

/// Failure of a query operation. Absence of data is not an error; see
/// [`crate::query::QueryOutcome::NoResults`].
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error("key {key} holds unsupported type {kind}")]
    UnsupportedKeyType { key: String, kind: String },
    #[error("query timed out after {0:?}")]
    TimedOut(Duration),
}

/// Failure loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_wraps_store_error() {
        let err: QueryError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, QueryError::StoreUnavailable(_)));
        assert_eq!(err.to_string(), "store unavailable: connection refused");
    }

    #[test]
    fn test_unsupported_key_message() {
        let err = QueryError::UnsupportedKeyType {
            key: "2024-05-01".into(),
            kind: "string".into(),
        };
        assert_eq!(err.to_string(), "key 2024-05-01 holds unsupported type string");
    }
}
