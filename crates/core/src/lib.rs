//! Core types for the Mercury quad store
//!
//! This crate defines the foundational vocabulary shared by every layer:
//! - [`AtomId`]: interned term identifier
//! - [`Timestamp`]: nanosecond bitemporal instant
//! - [`TemporalKey`]: the 56-byte composite sort key of the primary index
//! - [`Error`]: the unified error taxonomy
//! - [`StoreOptions`]: configuration recognised at store open
//! - [`DiagnosticBag`]: zero-alloc structured diagnostics
//!
//! Nothing in this crate touches the filesystem; it is pure data.

pub mod diagnostics;
pub mod error;
pub mod options;
pub mod temporal;
pub mod types;

pub use diagnostics::{Diagnostic, DiagnosticBag, Severity, Span};
pub use error::{Error, Result};
pub use options::StoreOptions;
pub use temporal::{KeyRange, QuadVersion, TemporalKey, TEMPORAL_KEY_LEN};
pub use types::{AtomId, Timestamp};
