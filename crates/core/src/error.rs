//! Error types for the Mercury quad store
//!
//! One unified error enum for the whole engine, mirroring the taxonomy the
//! public surface promises: I/O, corruption, disk-space refusal, lookups,
//! argument validation, concurrency, cancellation and forwarded parser
//! diagnostics. All errors are returned, never thrown; cursors surface their
//! error on the next `next` and move to the exhausted state.

use crate::types::AtomId;
use std::io;
use thiserror::Error;

/// Result type alias for Mercury operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all Mercury operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Disk, mmap, fsync or file-handle failure. The engine quiesces if the
    /// failure happened mid-commit.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WAL CRC mismatch past the truncation point, bad page magic, or an
    /// inconsistent header. Fatal for the store.
    #[error("corrupted data: {message}")]
    Corruption {
        /// Description of what failed to verify.
        message: String,
    },

    /// Refused growth that would drop free space below the configured floor.
    /// Surfaces before any mutation; store state is intact.
    #[error("insufficient disk space: need {required} bytes, {available} available")]
    InsufficientDiskSpace {
        /// Bytes the operation would have consumed.
        required: u64,
        /// Bytes currently available on the volume.
        available: u64,
    },

    /// Atom id, page id or named graph absent.
    #[error("not found: {entity}")]
    NotFound {
        /// What was looked up.
        entity: String,
    },

    /// Malformed temporal interval, unknown option, or invalid term syntax.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Why the argument was rejected.
        message: String,
    },

    /// Lock acquisition or batch discipline violation.
    #[error("concurrency error: {message}")]
    Concurrency {
        /// What went wrong.
        message: String,
    },

    /// Lock acquisition timed out. Distinct from other concurrency failures
    /// so callers can choose to retry.
    #[error("lock acquisition timed out after {waited_ms}ms")]
    LockTimeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The per-query cancellation token fired.
    #[error("query cancelled")]
    QueryCancelled,

    /// Mutating operation on a read-only or quiesced store.
    #[error("store is read-only: {reason}")]
    ReadOnly {
        /// Why mutation is refused.
        reason: String,
    },

    /// Forwarded from a parser collaborator; location spans are preserved.
    #[error("parse error [{code}] at {line}:{column}: {message}")]
    Parse {
        /// Diagnostic code.
        code: u32,
        /// Human-readable message.
        message: String,
        /// One-based source line.
        line: u32,
        /// One-based source column.
        column: u32,
    },
}

impl Error {
    /// Create a Corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a Concurrency error.
    pub fn concurrency(message: impl Into<String>) -> Self {
        Error::Concurrency {
            message: message.into(),
        }
    }

    /// Create a ReadOnly error.
    pub fn read_only(reason: impl Into<String>) -> Self {
        Error::ReadOnly {
            reason: reason.into(),
        }
    }

    /// NotFound for an atom id.
    pub fn atom_not_found(id: AtomId) -> Self {
        Error::NotFound {
            entity: format!("atom {}", id),
        }
    }

    /// NotFound for a page id.
    pub fn page_not_found(page_id: u64) -> Self {
        Error::NotFound {
            entity: format!("page {}", page_id),
        }
    }

    /// NotFound for a named graph.
    pub fn graph_not_found(iri: impl Into<String>) -> Self {
        Error::NotFound {
            entity: format!("named graph <{}>", iri.into()),
        }
    }

    /// True for corruption errors.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption { .. })
    }

    /// True for lookup failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for argument validation failures.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument { .. })
    }

    /// True for cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::QueryCancelled)
    }

    /// True for errors that may succeed on retry: lock timeouts and other
    /// concurrency failures. Validation, corruption and I/O failures are not
    /// retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::Concurrency { .. })
    }

    /// True for errors that indicate possible data loss and should be
    /// escalated: corruption and I/O failures.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Corruption { .. } | Error::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = Error::corruption("bad page magic");
        assert!(e.to_string().contains("bad page magic"));

        let e = Error::InsufficientDiskSpace {
            required: 100,
            available: 7,
        };
        assert!(e.to_string().contains("100"));
        assert!(e.to_string().contains("7"));

        let e = Error::LockTimeout { waited_ms: 250 };
        assert!(e.to_string().contains("250"));
    }

    #[test]
    fn from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.is_serious());
    }

    #[test]
    fn not_found_constructors() {
        assert!(Error::atom_not_found(AtomId::from_raw(42)).is_not_found());
        assert!(Error::page_not_found(3).is_not_found());
        let e = Error::graph_not_found("http://g1");
        assert!(e.to_string().contains("http://g1"));
    }

    #[test]
    fn classification() {
        assert!(Error::LockTimeout { waited_ms: 1 }.is_retryable());
        assert!(Error::concurrency("writer active").is_retryable());
        assert!(!Error::corruption("x").is_retryable());
        assert!(Error::corruption("x").is_serious());
        assert!(Error::QueryCancelled.is_cancelled());
        assert!(!Error::QueryCancelled.is_serious());
    }

    #[test]
    fn parse_error_preserves_span() {
        let e = Error::Parse {
            code: 1201,
            message: "unexpected token".into(),
            line: 3,
            column: 14,
        };
        let s = e.to_string();
        assert!(s.contains("1201"));
        assert!(s.contains("3:14"));
    }
}
