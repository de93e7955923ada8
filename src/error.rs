//! Error types for the metrics hub
//!
//! Errors are contained at the unit they occur in: one malformed line, one
//! failed target, one unreachable series. Only [`QueryError`] travels back to
//! a caller as the explicit outcome of an operation; everything else is
//! logged, counted and dropped so the surrounding batch keeps going.

use thiserror::Error;

/// Main error type for the hub
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Scrape error
    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the backing time-series store
///
/// The store is the only shared mutable resource; when it is unreachable the
/// operation is abandoned, the error counted, and the caller moves on to the
/// next unit of work. No automatic retry happens within the same tick.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Connection to the backing store failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// A store command exceeded its timeout
    #[error("Command timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// A stored member could not be decoded back into a point
    #[error("Corrupt member in {key}: {member}")]
    CorruptMember {
        /// Storage key holding the bad member
        key: String,
        /// The raw member text
        member: String,
    },

    /// Serialization of a record failed
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Errors from one scrape attempt against one target
///
/// A failed target is marked down and retried on its next cycle only; the
/// failure never touches any other target's schedule.
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// The fetch exceeded the target's hard timeout
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The target answered with a non-2xx status
    #[error("Unexpected status {0}")]
    Status(u16),

    /// Transport-level failure (DNS, connect, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            // reqwest does not expose the configured timeout; callers that
            // know it produce Timeout directly with the right value
            ScrapeError::Timeout(0)
        } else if let Some(status) = e.status() {
            ScrapeError::Status(status.as_u16())
        } else {
            ScrapeError::Http(e.to_string())
        }
    }
}

/// Errors surfaced to a query caller (HTTP 400 equivalent)
#[derive(Error, Debug)]
pub enum QueryError {
    /// Selector syntax error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Range bounds are inverted or missing
    #[error("Invalid time range: start {start} >= end {end}")]
    InvalidRange {
        /// Requested start (unix ms)
        start: i64,
        /// Requested end (unix ms)
        end: i64,
    },

    /// A `=~` / `!~` matcher carried an invalid pattern
    #[error("Invalid regex {pattern:?}: {message}")]
    InvalidRegex {
        /// The offending pattern
        pattern: String,
        /// Regex compiler message
        message: String,
    },

    /// The store failed while resolving the query
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::from(StorageError::Connection("refused".into()));
        assert_eq!(e.to_string(), "Storage error: Connection error: refused");

        let e = ScrapeError::Status(503);
        assert_eq!(e.to_string(), "Unexpected status 503");

        let e = QueryError::InvalidRange {
            start: 100,
            end: 50,
        };
        assert!(e.to_string().contains("start 100"));
    }

    #[test]
    fn test_storage_error_into_query_error() {
        let storage = StorageError::Timeout(std::time::Duration::from_secs(1));
        let query: QueryError = storage.into();
        assert!(matches!(query, QueryError::Storage(_)));
    }
}
