//! The bitemporal sort key of the primary index.
//!
//! # Wire Format
//!
//! A [`TemporalKey`] occupies exactly 56 bytes on disk: seven little-endian
//! 64-bit fields in GSPO + valid_from + valid_to + tx_time order.
//!
//! ```text
//! ┌───────┬─────────┬───────────┬────────┬────────────┬──────────┬─────────┐
//! │ graph │ subject │ predicate │ object │ valid_from │ valid_to │ tx_time │
//! │  u64  │   u64   │    u64    │  u64   │    i64     │   i64    │   i64   │
//! └───────┴─────────┴───────────┴────────┴────────────┴──────────┴─────────┘
//! ```
//!
//! Comparison is lexicographic in declaration order, which is why the struct
//! derives `Ord`: graph first, then subject, predicate, object, then the
//! temporal fields. Range scans over a partially-bound GSPO prefix are the
//! sole structural source of query efficiency.

use crate::error::{Error, Result};
use crate::types::{AtomId, Timestamp};

/// Encoded size of a [`TemporalKey`] in bytes.
pub const TEMPORAL_KEY_LEN: usize = 56;

/// The composite sort key: four term positions plus two temporal intervals.
///
/// Field order is comparison order; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemporalKey {
    /// Graph position; [`AtomId::NONE`] is the default graph.
    pub graph: AtomId,
    /// Subject position.
    pub subject: AtomId,
    /// Predicate position.
    pub predicate: AtomId,
    /// Object position.
    pub object: AtomId,
    /// Start of the valid interval (inclusive).
    pub valid_from: Timestamp,
    /// End of the valid interval (exclusive); [`Timestamp::MAX`] = still valid.
    pub valid_to: Timestamp,
    /// Transaction time, assigned monotonically by the store at commit.
    pub tx_time: Timestamp,
}

impl TemporalKey {
    /// The smallest possible key.
    pub const MIN: TemporalKey = TemporalKey {
        graph: AtomId::NONE,
        subject: AtomId::NONE,
        predicate: AtomId::NONE,
        object: AtomId::NONE,
        valid_from: Timestamp::MIN,
        valid_to: Timestamp::MIN,
        tx_time: Timestamp::MIN,
    };

    /// The largest possible key.
    pub const MAX: TemporalKey = TemporalKey {
        graph: AtomId::MAX,
        subject: AtomId::MAX,
        predicate: AtomId::MAX,
        object: AtomId::MAX,
        valid_from: Timestamp::MAX,
        valid_to: Timestamp::MAX,
        tx_time: Timestamp::MAX,
    };

    /// Serialize into a caller-provided 56-byte buffer.
    pub fn encode_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= TEMPORAL_KEY_LEN);
        buf[0..8].copy_from_slice(&self.graph.raw().to_le_bytes());
        buf[8..16].copy_from_slice(&self.subject.raw().to_le_bytes());
        buf[16..24].copy_from_slice(&self.predicate.raw().to_le_bytes());
        buf[24..32].copy_from_slice(&self.object.raw().to_le_bytes());
        buf[32..40].copy_from_slice(&self.valid_from.as_nanos().to_le_bytes());
        buf[40..48].copy_from_slice(&self.valid_to.as_nanos().to_le_bytes());
        buf[48..56].copy_from_slice(&self.tx_time.as_nanos().to_le_bytes());
    }

    /// Serialize into a fresh array.
    pub fn encode(&self) -> [u8; TEMPORAL_KEY_LEN] {
        let mut buf = [0u8; TEMPORAL_KEY_LEN];
        self.encode_to(&mut buf);
        buf
    }

    /// Deserialize from a 56-byte buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < TEMPORAL_KEY_LEN {
            return Err(Error::corruption(format!(
                "temporal key truncated: {} bytes",
                buf.len()
            )));
        }
        let u = |r: std::ops::Range<usize>| u64::from_le_bytes(buf[r].try_into().unwrap());
        let i = |r: std::ops::Range<usize>| i64::from_le_bytes(buf[r].try_into().unwrap());
        Ok(TemporalKey {
            graph: AtomId::from_raw(u(0..8)),
            subject: AtomId::from_raw(u(8..16)),
            predicate: AtomId::from_raw(u(16..24)),
            object: AtomId::from_raw(u(24..32)),
            valid_from: Timestamp::from_nanos(i(32..40)),
            valid_to: Timestamp::from_nanos(i(40..48)),
            tx_time: Timestamp::from_nanos(i(48..56)),
        })
    }

    /// Point-query predicate: `valid_from <= t < valid_to`.
    #[inline]
    pub fn valid_at(&self, t: Timestamp) -> bool {
        self.valid_from <= t && t < self.valid_to
    }

    /// Overlap predicate: `valid_from < t2 && valid_to > t1`.
    #[inline]
    pub fn overlaps(&self, t1: Timestamp, t2: Timestamp) -> bool {
        self.valid_from < t2 && self.valid_to > t1
    }

    /// Validate the interval shape: `valid_from < valid_to`.
    pub fn check_interval(valid_from: Timestamp, valid_to: Timestamp) -> Result<()> {
        if valid_from >= valid_to {
            return Err(Error::invalid_argument(format!(
                "malformed temporal interval: valid_from {} >= valid_to {}",
                valid_from, valid_to
            )));
        }
        Ok(())
    }
}

/// One decoded index entry: the key plus the tombstone flag from its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuadVersion {
    /// Full temporal key.
    pub key: TemporalKey,
    /// True if this entry marks a logical deletion.
    pub tombstone: bool,
}

impl QuadVersion {
    /// Live entry (not a tombstone).
    pub fn live(key: TemporalKey) -> Self {
        QuadVersion {
            key,
            tombstone: false,
        }
    }
}

/// A half-open key range `[lower, upper]` for B+tree scans.
///
/// Built from the leading bound positions of a GSPO pattern: with graph and
/// subject fixed the range is narrow, with graph only it is wider, with
/// nothing fixed it spans the whole tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub lower: TemporalKey,
    /// Inclusive upper bound.
    pub upper: TemporalKey,
}

impl KeyRange {
    /// The full key space.
    pub const FULL: KeyRange = KeyRange {
        lower: TemporalKey::MIN,
        upper: TemporalKey::MAX,
    };

    /// Build a range from the longest bound GSPO prefix.
    ///
    /// Each `Some` extends the prefix; the first `None` stops it. Positions
    /// after a wildcard cannot narrow the range and are filtered during the
    /// scan instead.
    pub fn from_prefix(
        graph: Option<AtomId>,
        subject: Option<AtomId>,
        predicate: Option<AtomId>,
        object: Option<AtomId>,
    ) -> Self {
        let mut lower = TemporalKey::MIN;
        let mut upper = TemporalKey::MAX;

        let positions = [graph, subject, predicate, object];
        for (idx, bound) in positions.iter().enumerate() {
            match bound {
                Some(id) => {
                    let (lo, up): (&mut AtomId, &mut AtomId) = match idx {
                        0 => (&mut lower.graph, &mut upper.graph),
                        1 => (&mut lower.subject, &mut upper.subject),
                        2 => (&mut lower.predicate, &mut upper.predicate),
                        _ => (&mut lower.object, &mut upper.object),
                    };
                    *lo = *id;
                    *up = *id;
                }
                None => break,
            }
        }
        KeyRange { lower, upper }
    }

    /// True if `key` falls inside the range.
    #[inline]
    pub fn contains(&self, key: &TemporalKey) -> bool {
        self.lower <= *key && *key <= self.upper
    }
}
