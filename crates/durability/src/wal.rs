//! The write-ahead log.
//!
//! Batches are buffered by the engine and reach the log only at commit:
//! every record of the batch is appended under one tx id, a `Commit` marker
//! follows, and the segment is fsynced. A batch is durable iff its commit
//! marker is on disk, which is what makes replay atomic-per-batch.
//!
//! # State machine
//!
//! `Quiescent → AppendingBatch → FlushedBatch → AppliedBatch → Quiescent`;
//! any I/O failure moves to `ReadOnlyFaulted`, which is terminal until the
//! store is reopened.
//!
//! # Checkpoints
//!
//! A checkpoint writes a marker, rotates to a fresh segment and deletes the
//! superseded ones. The hybrid trigger (bytes since last checkpoint, elapsed
//! time, or an explicit call) is evaluated by the engine through
//! [`Wal::should_checkpoint`].

use crate::record::{DecodeError, RecordPayload, WalRecord};
use crate::segment::{WalSegment, SEGMENT_HEADER_SIZE};
use mercury_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// WAL lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalState {
    /// No batch in flight.
    Quiescent,
    /// Batch records are being appended.
    AppendingBatch,
    /// Batch records are durable; index apply pending.
    FlushedBatch,
    /// Index apply done; cache pages dirtied.
    AppliedBatch,
    /// An I/O failure occurred mid-commit; mutation refused until reopen.
    ReadOnlyFaulted,
}

/// What recovery found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryOutcome {
    /// Highest committed tx id observed (or the baseline if none).
    pub last_committed_tx: u64,
    /// Records handed to the apply callback.
    pub records_applied: u64,
    /// Bytes dropped from a torn tail.
    pub truncated_bytes: u64,
}

/// The write-ahead log over a directory of segment files.
pub struct Wal {
    dir: PathBuf,
    store_uuid: [u8; 16],
    active: WalSegment,
    /// Bytes in segments preceding the active one (live until checkpoint).
    retired_bytes: u64,
    next_tx: u64,
    flush_size: u64,
    bytes_since_flush: u64,
    bytes_since_checkpoint: u64,
    last_checkpoint: Instant,
    state: WalState,
}

impl Wal {
    /// Open the log, replaying committed post-checkpoint records through
    /// `apply`. Records with tx id at or below `applied_up_to` (the tree
    /// header's checkpoint tx) are skipped; replaying an applied record
    /// would be harmless but pointless, since index inserts are idempotent.
    pub fn open(
        dir: &Path,
        flush_size: u64,
        applied_up_to: u64,
        mut apply: impl FnMut(u64, &RecordPayload) -> Result<()>,
    ) -> Result<(Self, RecoveryOutcome)> {
        let numbers = WalSegment::list(dir)?;
        let mut outcome = RecoveryOutcome {
            last_committed_tx: applied_up_to,
            ..Default::default()
        };

        if numbers.is_empty() {
            let store_uuid = *Uuid::new_v4().as_bytes();
            let active = WalSegment::create(dir, 1, store_uuid)?;
            let wal = Wal {
                dir: dir.to_path_buf(),
                store_uuid,
                active,
                retired_bytes: 0,
                next_tx: applied_up_to + 1,
                flush_size,
                bytes_since_flush: 0,
                bytes_since_checkpoint: 0,
                last_checkpoint: Instant::now(),
                state: WalState::Quiescent,
            };
            return Ok((wal, outcome));
        }

        let mut store_uuid = None;
        let mut retired_bytes = 0u64;
        let last_number = *numbers.last().unwrap();

        for &number in &numbers {
            let mut segment = WalSegment::open(dir, number)?;
            match store_uuid {
                None => store_uuid = Some(segment.store_uuid()),
                Some(uuid) if uuid != segment.store_uuid() => {
                    return Err(Error::corruption(
                        "WAL segments belong to different stores",
                    ));
                }
                _ => {}
            }

            let bytes = segment.read_records()?;
            let is_last = number == last_number;
            let mut offset = 0usize;
            let mut last_good_end = 0usize;
            let mut pending: Vec<WalRecord> = Vec::new();

            loop {
                if offset >= bytes.len() {
                    break;
                }
                match WalRecord::from_bytes(&bytes[offset..]) {
                    Ok((record, consumed)) => {
                        offset += consumed;
                        match record.payload {
                            RecordPayload::Commit => {
                                for rec in pending.drain(..) {
                                    if rec.tx_id > applied_up_to {
                                        apply(rec.tx_id, &rec.payload)?;
                                        outcome.records_applied += 1;
                                    }
                                }
                                outcome.last_committed_tx =
                                    outcome.last_committed_tx.max(record.tx_id);
                                last_good_end = offset;
                            }
                            RecordPayload::Checkpoint { .. } => {
                                pending.clear();
                                last_good_end = offset;
                            }
                            _ => pending.push(record),
                        }
                    }
                    Err(DecodeError::Incomplete)
                    | Err(DecodeError::ChecksumMismatch)
                    | Err(DecodeError::BadKind) => {
                        if !is_last {
                            return Err(Error::corruption(format!(
                                "WAL damage in segment {} before the truncation point",
                                number
                            )));
                        }
                        let torn = (bytes.len() - last_good_end) as u64;
                        warn!(
                            segment = number,
                            torn_bytes = torn,
                            "truncating WAL at last valid boundary"
                        );
                        segment.truncate(SEGMENT_HEADER_SIZE as u64 + last_good_end as u64)?;
                        outcome.truncated_bytes = torn;
                        pending.clear();
                        break;
                    }
                }
            }

            if !pending.is_empty() {
                // A batch without its commit marker: abandoned, never
                // applied. Drop it from the tail so tx ids stay gap-free.
                warn!(
                    segment = number,
                    records = pending.len(),
                    "discarding uncommitted batch tail"
                );
                if is_last {
                    let torn = (bytes.len().min(offset) - last_good_end) as u64;
                    segment.truncate(SEGMENT_HEADER_SIZE as u64 + last_good_end as u64)?;
                    outcome.truncated_bytes += torn;
                }
            }

            if !is_last {
                retired_bytes += segment.size();
            }
        }

        let active = WalSegment::open(dir, last_number)?;
        let next_tx = outcome.last_committed_tx.max(applied_up_to) + 1;
        info!(
            last_tx = outcome.last_committed_tx,
            replayed = outcome.records_applied,
            truncated = outcome.truncated_bytes,
            "WAL recovery complete"
        );

        let wal = Wal {
            dir: dir.to_path_buf(),
            store_uuid: store_uuid.expect("at least one segment"),
            active,
            retired_bytes,
            next_tx,
            flush_size,
            bytes_since_flush: 0,
            bytes_since_checkpoint: 0,
            last_checkpoint: Instant::now(),
            state: WalState::Quiescent,
        };
        Ok((wal, outcome))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WalState {
        self.state
    }

    /// Tx id the next committed batch will receive.
    pub fn next_tx(&self) -> u64 {
        self.next_tx
    }

    /// Highest committed tx id.
    pub fn last_committed_tx(&self) -> u64 {
        self.next_tx - 1
    }

    /// Total log bytes on disk.
    pub fn size(&self) -> u64 {
        self.retired_bytes + self.active.size()
    }

    /// UUID stamped into every segment of this store.
    pub fn store_uuid(&self) -> [u8; 16] {
        self.store_uuid
    }

    /// Append all records of a batch under one fresh tx id, follow with the
    /// commit marker, and fsync. Returns the assigned tx id.
    ///
    /// On any I/O failure the log faults read-only and the error surfaces;
    /// nothing of the batch is considered durable.
    pub fn commit_batch(&mut self, payloads: &[RecordPayload]) -> Result<u64> {
        self.check_writable()?;
        self.state = WalState::AppendingBatch;
        let tx_id = self.next_tx;
        match self.append_and_sync(tx_id, payloads) {
            Ok(()) => {
                self.state = WalState::FlushedBatch;
                self.next_tx += 1;
                Ok(tx_id)
            }
            Err(e) => {
                self.state = WalState::ReadOnlyFaulted;
                Err(e)
            }
        }
    }

    fn append_and_sync(&mut self, tx_id: u64, payloads: &[RecordPayload]) -> Result<()> {
        for payload in payloads {
            let bytes = WalRecord::new(tx_id, payload.clone()).to_bytes();
            self.active.append(&bytes)?;
            self.bytes_since_flush += bytes.len() as u64;
            self.bytes_since_checkpoint += bytes.len() as u64;
            if self.bytes_since_flush >= self.flush_size {
                self.active.sync()?;
                self.bytes_since_flush = 0;
            }
        }
        let commit = WalRecord::new(tx_id, RecordPayload::Commit).to_bytes();
        self.active.append(&commit)?;
        self.bytes_since_checkpoint += commit.len() as u64;
        self.active.sync()?;
        self.bytes_since_flush = 0;
        Ok(())
    }

    /// Force the faulted state: the engine calls this when the index apply
    /// failed after the batch was already durable. Recovery redoes the
    /// apply on reopen.
    pub fn fault(&mut self) {
        self.state = WalState::ReadOnlyFaulted;
    }

    /// Note that the committed batch has been applied to the in-memory
    /// index and its cache pages dirtied.
    pub fn mark_applied(&mut self) {
        if self.state == WalState::FlushedBatch {
            self.state = WalState::AppliedBatch;
            self.state = WalState::Quiescent;
        }
    }

    /// True when the hybrid checkpoint trigger has fired.
    pub fn should_checkpoint(&self, checkpoint_size: u64, interval_secs: u64) -> bool {
        if self.bytes_since_checkpoint == 0 {
            return false;
        }
        self.bytes_since_checkpoint >= checkpoint_size
            || self.last_checkpoint.elapsed().as_secs() >= interval_secs
    }

    /// Write a checkpoint marker, rotate to a fresh segment and delete the
    /// superseded ones. The caller must have flushed dirty index pages
    /// first; after this, earlier WAL records are unrecoverable.
    pub fn checkpoint(&mut self, last_applied_tx: u64) -> Result<()> {
        self.check_writable()?;
        let result = self.checkpoint_inner(last_applied_tx);
        if result.is_err() {
            self.state = WalState::ReadOnlyFaulted;
        }
        result
    }

    fn checkpoint_inner(&mut self, last_applied_tx: u64) -> Result<()> {
        let marker =
            WalRecord::new(last_applied_tx, RecordPayload::Checkpoint { last_applied_tx })
                .to_bytes();
        self.active.append(&marker)?;
        self.active.sync()?;

        let old_number = self.active.segment_number();
        let new_number = old_number + 1;
        let new_segment = WalSegment::create(&self.dir, new_number, self.store_uuid)?;
        let old = std::mem::replace(&mut self.active, new_segment);
        drop(old);

        for number in WalSegment::list(&self.dir)? {
            if number < new_number {
                std::fs::remove_file(WalSegment::segment_path(&self.dir, number))?;
            }
        }

        self.retired_bytes = 0;
        self.bytes_since_checkpoint = 0;
        self.bytes_since_flush = 0;
        self.last_checkpoint = Instant::now();
        debug!(
            checkpoint_tx = last_applied_tx,
            segment = new_number,
            "checkpoint complete, prior segments truncated"
        );
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match self.state {
            WalState::ReadOnlyFaulted => Err(Error::read_only(
                "write-ahead log faulted; reopen the store",
            )),
            WalState::Quiescent => Ok(()),
            other => Err(Error::concurrency(format!(
                "WAL busy in state {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_core::{AtomId, TemporalKey, Timestamp};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn insert_payload(s: u64) -> RecordPayload {
        RecordPayload::QuadInsert {
            key: TemporalKey {
                graph: AtomId::NONE,
                subject: AtomId::from_raw(s),
                predicate: AtomId::from_raw(1),
                object: AtomId::from_raw(1),
                valid_from: Timestamp::EPOCH,
                valid_to: Timestamp::MAX,
                tx_time: Timestamp::EPOCH,
            },
        }
    }

    fn open_collecting(
        dir: &Path,
        applied_up_to: u64,
    ) -> (Wal, RecoveryOutcome, Vec<(u64, RecordPayload)>) {
        let mut seen = Vec::new();
        let (wal, outcome) = Wal::open(dir, 4096, applied_up_to, |tx, payload| {
            seen.push((tx, payload.clone()));
            Ok(())
        })
        .unwrap();
        (wal, outcome, seen)
    }

    #[test]
    fn fresh_log_starts_at_tx_one() {
        let dir = tempdir().unwrap();
        let (wal, outcome, seen) = open_collecting(dir.path(), 0);
        assert_eq!(wal.next_tx(), 1);
        assert_eq!(outcome.records_applied, 0);
        assert!(seen.is_empty());
        assert_eq!(wal.state(), WalState::Quiescent);
    }

    #[test]
    fn commit_assigns_increasing_gap_free_tx() {
        let dir = tempdir().unwrap();
        let (mut wal, _, _) = open_collecting(dir.path(), 0);
        for expected in 1..=5u64 {
            let tx = wal.commit_batch(&[insert_payload(expected)]).unwrap();
            assert_eq!(tx, expected);
            wal.mark_applied();
        }
        assert_eq!(wal.last_committed_tx(), 5);
    }

    #[test]
    fn committed_batches_replay_in_order() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            wal.commit_batch(&[insert_payload(1), insert_payload(2)])
                .unwrap();
            wal.mark_applied();
            wal.commit_batch(&[insert_payload(3)]).unwrap();
            wal.mark_applied();
        }
        let (wal, outcome, seen) = open_collecting(dir.path(), 0);
        assert_eq!(outcome.records_applied, 3);
        assert_eq!(outcome.last_committed_tx, 2);
        assert_eq!(wal.next_tx(), 3);
        let subjects: Vec<u64> = seen
            .iter()
            .map(|(_, p)| match p {
                RecordPayload::QuadInsert { key } => key.subject.raw(),
                _ => panic!("unexpected payload"),
            })
            .collect();
        assert_eq!(subjects, vec![1, 2, 3]);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[2].0, 2);
    }

    #[test]
    fn replay_skips_already_applied() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            for i in 1..=4u64 {
                wal.commit_batch(&[insert_payload(i)]).unwrap();
                wal.mark_applied();
            }
        }
        let (_, outcome, seen) = open_collecting(dir.path(), 2);
        assert_eq!(outcome.records_applied, 2);
        assert_eq!(seen.iter().map(|(tx, _)| *tx).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn torn_tail_is_truncated_not_fatal() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            wal.commit_batch(&[insert_payload(1)]).unwrap();
            wal.mark_applied();
        }
        // Garbage after the last commit: a torn append.
        {
            let mut f = OpenOptions::new()
                .append(true)
                .open(WalSegment::segment_path(dir.path(), 1))
                .unwrap();
            f.write_all(&[0x55, 0x99, 0x20, 0x00, 0x00, 0x01]).unwrap();
        }
        let (mut wal, outcome, _) = open_collecting(dir.path(), 0);
        assert_eq!(outcome.last_committed_tx, 1);
        assert!(outcome.truncated_bytes > 0);
        // The log is writable again at the clean boundary.
        let tx = wal.commit_batch(&[insert_payload(2)]).unwrap();
        assert_eq!(tx, 2);
    }

    #[test]
    fn uncommitted_batch_is_not_applied() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            wal.commit_batch(&[insert_payload(1)]).unwrap();
            wal.mark_applied();
            // Hand-append records WITHOUT a commit marker.
            let rec = WalRecord::new(2, insert_payload(99)).to_bytes();
            wal.active.append(&rec).unwrap();
            wal.active.sync().unwrap();
        }
        let (wal, outcome, seen) = open_collecting(dir.path(), 0);
        assert_eq!(outcome.records_applied, 1);
        assert_eq!(seen.len(), 1);
        // The abandoned tx id is reusable after the tail was dropped.
        assert_eq!(wal.next_tx(), 2);
    }

    #[test]
    fn checkpoint_rotates_and_deletes() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            for i in 1..=3u64 {
                wal.commit_batch(&[insert_payload(i)]).unwrap();
                wal.mark_applied();
            }
            wal.checkpoint(3).unwrap();
            assert_eq!(WalSegment::list(dir.path()).unwrap(), vec![2]);
        }
        // Nothing to replay: everything predates the checkpoint.
        let (wal, outcome, seen) = open_collecting(dir.path(), 3);
        assert_eq!(outcome.records_applied, 0);
        assert!(seen.is_empty());
        assert_eq!(wal.next_tx(), 4);
    }

    #[test]
    fn records_after_checkpoint_replay() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            wal.commit_batch(&[insert_payload(1)]).unwrap();
            wal.mark_applied();
            wal.checkpoint(1).unwrap();
            wal.commit_batch(&[insert_payload(2)]).unwrap();
            wal.mark_applied();
        }
        let (_, outcome, seen) = open_collecting(dir.path(), 1);
        assert_eq!(outcome.records_applied, 1);
        assert_eq!(seen[0].0, 2);
    }

    #[test]
    fn checkpoint_trigger_thresholds() {
        let dir = tempdir().unwrap();
        let (mut wal, _, _) = open_collecting(dir.path(), 0);
        assert!(!wal.should_checkpoint(1024, 3600));
        wal.commit_batch(&[insert_payload(1)]).unwrap();
        wal.mark_applied();
        assert!(!wal.should_checkpoint(1024 * 1024, 3600));
        assert!(wal.should_checkpoint(1, 3600));
        assert!(wal.should_checkpoint(1024 * 1024, 0));
    }

    #[test]
    fn busy_state_rejects_overlapping_commit() {
        let dir = tempdir().unwrap();
        let (mut wal, _, _) = open_collecting(dir.path(), 0);
        wal.commit_batch(&[insert_payload(1)]).unwrap();
        // mark_applied not called: still FlushedBatch.
        let err = wal.commit_batch(&[insert_payload(2)]).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn atom_assign_records_replay() {
        let dir = tempdir().unwrap();
        {
            let (mut wal, _, _) = open_collecting(dir.path(), 0);
            wal.commit_batch(&[
                RecordPayload::AtomAssign {
                    atom_id: AtomId::from_raw(1),
                    term: b"http://example.org/s".to_vec(),
                },
                insert_payload(1),
            ])
            .unwrap();
            wal.mark_applied();
        }
        let (_, _, seen) = open_collecting(dir.path(), 0);
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            &seen[0].1,
            RecordPayload::AtomAssign { atom_id, term }
                if atom_id.raw() == 1 && term == b"http://example.org/s"
        ));
    }
}
