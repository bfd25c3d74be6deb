//! WAL record format.
//!
//! # Record Layout
//!
//! ```text
//! ┌──────────────┬────────────┬──────────┬───────────────────┬───────────┐
//! │ Length (4)   │ TxId (8)   │ Kind (1) │ Payload (variable)│ CRC32 (4) │
//! └──────────────┴────────────┴──────────┴───────────────────┴───────────┘
//! ```
//!
//! The length field covers everything after itself (tx id through CRC), so
//! records are self-delimiting. The CRC covers tx id, kind and payload;
//! every record verifies independently. A record with a bad CRC or a
//! truncated tail stops replay at the last valid boundary.
//!
//! # Kinds
//!
//! | Kind | Payload |
//! |------|---------|
//! | `AtomAssign`    | `atom_id u64` + term bytes |
//! | `QuadInsert`    | 56-byte temporal key |
//! | `QuadTombstone` | 56-byte temporal key |
//! | `Commit`        | empty; the batch with this tx id is durable |
//! | `Checkpoint`    | `last_applied_tx u64`; prior records superseded |

use crc32fast::Hasher;
use mercury_core::{AtomId, TemporalKey, TEMPORAL_KEY_LEN};

const KIND_ATOM_ASSIGN: u8 = 1;
const KIND_QUAD_INSERT: u8 = 2;
const KIND_QUAD_TOMBSTONE: u8 = 3;
const KIND_COMMIT: u8 = 4;
const KIND_CHECKPOINT: u8 = 5;

/// Fixed overhead around the payload: length + tx id + kind + crc.
pub const RECORD_OVERHEAD: usize = 4 + 8 + 1 + 4;

/// One logical mutation (or marker) in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    /// A term received this atom id.
    AtomAssign {
        /// Assigned id.
        atom_id: AtomId,
        /// Term bytes.
        term: Vec<u8>,
    },
    /// A quad version entered the index.
    QuadInsert {
        /// Full temporal key.
        key: TemporalKey,
    },
    /// A logical deletion entered the index.
    QuadTombstone {
        /// Full temporal key of the tombstone entry.
        key: TemporalKey,
    },
    /// All records of this tx id are durable.
    Commit,
    /// Records with tx id at or below this are applied and flushed.
    Checkpoint {
        /// Last applied transaction.
        last_applied_tx: u64,
    },
}

/// A record paired with its transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Transaction this record belongs to.
    pub tx_id: u64,
    /// The mutation or marker.
    pub payload: RecordPayload,
}

/// Record decode failures. Only `ChecksumMismatch` and `BadKind` indicate
/// damage; `Incomplete` is the normal end-of-log condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes for a whole record: a clean truncation point.
    Incomplete,
    /// CRC did not verify.
    ChecksumMismatch,
    /// Unknown record kind or malformed payload.
    BadKind,
}

impl WalRecord {
    /// Create a record.
    pub fn new(tx_id: u64, payload: RecordPayload) -> Self {
        WalRecord { tx_id, payload }
    }

    /// Serialize for appending to a segment.
    pub fn to_bytes(&self) -> Vec<u8> {
        let (kind, payload_len) = match &self.payload {
            RecordPayload::AtomAssign { term, .. } => (KIND_ATOM_ASSIGN, 8 + term.len()),
            RecordPayload::QuadInsert { .. } => (KIND_QUAD_INSERT, TEMPORAL_KEY_LEN),
            RecordPayload::QuadTombstone { .. } => (KIND_QUAD_TOMBSTONE, TEMPORAL_KEY_LEN),
            RecordPayload::Commit => (KIND_COMMIT, 0),
            RecordPayload::Checkpoint { .. } => (KIND_CHECKPOINT, 8),
        };

        // Body = tx_id + kind + payload; CRC covers the body.
        let mut body = Vec::with_capacity(9 + payload_len);
        body.extend_from_slice(&self.tx_id.to_le_bytes());
        body.push(kind);
        match &self.payload {
            RecordPayload::AtomAssign { atom_id, term } => {
                body.extend_from_slice(&atom_id.raw().to_le_bytes());
                body.extend_from_slice(term);
            }
            RecordPayload::QuadInsert { key } | RecordPayload::QuadTombstone { key } => {
                body.extend_from_slice(&key.encode());
            }
            RecordPayload::Commit => {}
            RecordPayload::Checkpoint { last_applied_tx } => {
                body.extend_from_slice(&last_applied_tx.to_le_bytes());
            }
        }

        let mut hasher = Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut out = Vec::with_capacity(4 + body.len() + 4);
        out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode one record from the front of `bytes`.
    ///
    /// Returns the record and the bytes consumed.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        if bytes.len() < 4 {
            return Err(DecodeError::Incomplete);
        }
        let length = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        if length < 13 {
            // Minimum: tx id + kind + crc.
            return Err(DecodeError::BadKind);
        }
        if bytes.len() < 4 + length {
            return Err(DecodeError::Incomplete);
        }
        let body = &bytes[4..4 + length - 4];
        let stored_crc =
            u32::from_le_bytes(bytes[4 + length - 4..4 + length].try_into().unwrap());
        let mut hasher = Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(DecodeError::ChecksumMismatch);
        }

        let tx_id = u64::from_le_bytes(body[0..8].try_into().unwrap());
        let kind = body[8];
        let payload_bytes = &body[9..];
        let payload = match kind {
            KIND_ATOM_ASSIGN => {
                if payload_bytes.len() < 8 {
                    return Err(DecodeError::BadKind);
                }
                RecordPayload::AtomAssign {
                    atom_id: AtomId::from_raw(u64::from_le_bytes(
                        payload_bytes[0..8].try_into().unwrap(),
                    )),
                    term: payload_bytes[8..].to_vec(),
                }
            }
            KIND_QUAD_INSERT | KIND_QUAD_TOMBSTONE => {
                if payload_bytes.len() != TEMPORAL_KEY_LEN {
                    return Err(DecodeError::BadKind);
                }
                let key = TemporalKey::decode(payload_bytes).map_err(|_| DecodeError::BadKind)?;
                if kind == KIND_QUAD_INSERT {
                    RecordPayload::QuadInsert { key }
                } else {
                    RecordPayload::QuadTombstone { key }
                }
            }
            KIND_COMMIT => {
                if !payload_bytes.is_empty() {
                    return Err(DecodeError::BadKind);
                }
                RecordPayload::Commit
            }
            KIND_CHECKPOINT => {
                if payload_bytes.len() != 8 {
                    return Err(DecodeError::BadKind);
                }
                RecordPayload::Checkpoint {
                    last_applied_tx: u64::from_le_bytes(payload_bytes[0..8].try_into().unwrap()),
                }
            }
            _ => return Err(DecodeError::BadKind),
        };

        Ok((WalRecord { tx_id, payload }, 4 + length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_core::Timestamp;

    fn sample_key() -> TemporalKey {
        TemporalKey {
            graph: AtomId::NONE,
            subject: AtomId::from_raw(2),
            predicate: AtomId::from_raw(3),
            object: AtomId::from_raw(4),
            valid_from: Timestamp::from_nanos(100),
            valid_to: Timestamp::MAX,
            tx_time: Timestamp::from_nanos(200),
        }
    }

    #[test]
    fn atom_assign_roundtrip() {
        let rec = WalRecord::new(
            7,
            RecordPayload::AtomAssign {
                atom_id: AtomId::from_raw(19),
                term: b"http://example.org/p".to_vec(),
            },
        );
        let bytes = rec.to_bytes();
        let (parsed, consumed) = WalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, rec);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn quad_records_roundtrip() {
        for payload in [
            RecordPayload::QuadInsert { key: sample_key() },
            RecordPayload::QuadTombstone { key: sample_key() },
        ] {
            let rec = WalRecord::new(42, payload);
            let bytes = rec.to_bytes();
            let (parsed, _) = WalRecord::from_bytes(&bytes).unwrap();
            assert_eq!(parsed, rec);
        }
    }

    #[test]
    fn marker_records_roundtrip() {
        for payload in [
            RecordPayload::Commit,
            RecordPayload::Checkpoint {
                last_applied_tx: 99,
            },
        ] {
            let rec = WalRecord::new(99, payload);
            let bytes = rec.to_bytes();
            let (parsed, _) = WalRecord::from_bytes(&bytes).unwrap();
            assert_eq!(parsed, rec);
        }
    }

    #[test]
    fn corrupted_byte_fails_crc() {
        let rec = WalRecord::new(1, RecordPayload::Commit);
        let mut bytes = rec.to_bytes();
        bytes[6] ^= 0x01;
        assert_eq!(
            WalRecord::from_bytes(&bytes),
            Err(DecodeError::ChecksumMismatch)
        );
    }

    #[test]
    fn truncated_tail_is_incomplete() {
        let rec = WalRecord::new(1, RecordPayload::QuadInsert { key: sample_key() });
        let bytes = rec.to_bytes();
        assert_eq!(
            WalRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Incomplete)
        );
        assert_eq!(WalRecord::from_bytes(&[1, 2]), Err(DecodeError::Incomplete));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let rec = WalRecord::new(1, RecordPayload::Commit);
        let mut bytes = rec.to_bytes();
        // Flip the kind byte and fix up the CRC so only the kind is wrong.
        bytes[12] = 0xEE;
        let body_end = bytes.len() - 4;
        let mut hasher = Hasher::new();
        hasher.update(&bytes[4..body_end]);
        let crc = hasher.finalize();
        bytes[body_end..].copy_from_slice(&crc.to_le_bytes());
        assert_eq!(WalRecord::from_bytes(&bytes), Err(DecodeError::BadKind));
    }

    #[test]
    fn records_parse_in_sequence() {
        let records = vec![
            WalRecord::new(
                1,
                RecordPayload::AtomAssign {
                    atom_id: AtomId::from_raw(1),
                    term: b"a".to_vec(),
                },
            ),
            WalRecord::new(1, RecordPayload::QuadInsert { key: sample_key() }),
            WalRecord::new(1, RecordPayload::Commit),
        ];
        let mut stream = Vec::new();
        for r in &records {
            stream.extend_from_slice(&r.to_bytes());
        }
        let mut offset = 0;
        for expected in &records {
            let (parsed, consumed) = WalRecord::from_bytes(&stream[offset..]).unwrap();
            assert_eq!(&parsed, expected);
            offset += consumed;
        }
        assert_eq!(offset, stream.len());
    }
}
