//! Per-predicate cardinality statistics.
//!
//! Recomputed by a full index scan at every checkpoint and persisted to
//! `stats.bin`. The snapshot feeds join reordering in the query planner; it
//! is advisory only, so a missing or corrupt file degrades to empty
//! statistics rather than failing the open.
//!
//! # File layout
//!
//! ```text
//! magic u32 | version u32 | checkpoint_tx u64 | n u32
//! n × (predicate u64 | count u64 | distinct_subjects u64)
//! crc32 u32      (over everything before it)
//! ```

use crc32fast::Hasher;
use mercury_core::{AtomId, QuadVersion, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Magic for `stats.bin`: "MQST".
const STATS_MAGIC: u32 = u32::from_le_bytes(*b"MQST");
const STATS_VERSION: u32 = 1;

/// Cardinality figures for one predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PredicateStats {
    /// Non-tombstone entries carrying this predicate.
    pub count: u64,
    /// Distinct subjects observed under this predicate.
    pub distinct_subjects: u64,
}

/// A point-in-time statistics snapshot, keyed by predicate atom id.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    map: FxHashMap<u64, PredicateStats>,
    /// Non-tombstone entries in the whole index at snapshot time.
    pub total_quads: u64,
    /// Transaction id of the checkpoint that produced this snapshot.
    pub checkpoint_tx: u64,
}

impl StatsSnapshot {
    /// Empty statistics (cold store, or stats file unusable).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from an index scan.
    pub fn collect(
        entries: impl Iterator<Item = Result<QuadVersion>>,
        checkpoint_tx: u64,
    ) -> Result<Self> {
        let mut counts: FxHashMap<u64, u64> = FxHashMap::default();
        let mut subjects: FxHashMap<u64, FxHashSet<u64>> = FxHashMap::default();
        let mut total = 0u64;
        for entry in entries {
            let v = entry?;
            if v.tombstone {
                continue;
            }
            total += 1;
            let p = v.key.predicate.raw();
            *counts.entry(p).or_default() += 1;
            subjects.entry(p).or_default().insert(v.key.subject.raw());
        }
        let map = counts
            .into_iter()
            .map(|(p, count)| {
                let distinct = subjects.get(&p).map(|s| s.len() as u64).unwrap_or(0);
                (
                    p,
                    PredicateStats {
                        count,
                        distinct_subjects: distinct,
                    },
                )
            })
            .collect();
        Ok(StatsSnapshot {
            map,
            total_quads: total,
            checkpoint_tx,
        })
    }

    /// Figures for a predicate, if the snapshot has seen it.
    pub fn predicate(&self, p: AtomId) -> Option<PredicateStats> {
        self.map.get(&p.raw()).copied()
    }

    /// Number of predicates in the snapshot.
    pub fn predicate_count(&self) -> usize {
        self.map.len()
    }

    /// Persist to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut body = Vec::with_capacity(20 + self.map.len() * 24);
        body.extend_from_slice(&STATS_MAGIC.to_le_bytes());
        body.extend_from_slice(&STATS_VERSION.to_le_bytes());
        body.extend_from_slice(&self.checkpoint_tx.to_le_bytes());
        body.extend_from_slice(&(self.map.len() as u32).to_le_bytes());
        let mut keys: Vec<u64> = self.map.keys().copied().collect();
        keys.sort_unstable();
        for p in keys {
            let s = self.map[&p];
            body.extend_from_slice(&p.to_le_bytes());
            body.extend_from_slice(&s.count.to_le_bytes());
            body.extend_from_slice(&s.distinct_subjects.to_le_bytes());
        }
        let mut hasher = Hasher::new();
        hasher.update(&body);
        body.extend_from_slice(&hasher.finalize().to_le_bytes());

        let tmp = path.with_extension("bin.tmp");
        let mut file = File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_data()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load from `path`; any defect degrades to empty statistics.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Some(snapshot) => snapshot,
            None => {
                debug!("statistics file missing or unusable; starting cold");
                StatsSnapshot::empty()
            }
        }
    }

    fn try_load(path: &Path) -> Option<Self> {
        let mut bytes = Vec::new();
        File::open(path).ok()?.read_to_end(&mut bytes).ok()?;
        if bytes.len() < 24 {
            return None;
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().ok()?);
        let mut hasher = Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return None;
        }
        if u32::from_le_bytes(body[0..4].try_into().ok()?) != STATS_MAGIC {
            return None;
        }
        if u32::from_le_bytes(body[4..8].try_into().ok()?) != STATS_VERSION {
            return None;
        }
        let checkpoint_tx = u64::from_le_bytes(body[8..16].try_into().ok()?);
        let n = u32::from_le_bytes(body[16..20].try_into().ok()?) as usize;
        if body.len() != 20 + n * 24 {
            return None;
        }
        let mut map = FxHashMap::default();
        let mut total = 0u64;
        for i in 0..n {
            let off = 20 + i * 24;
            let p = u64::from_le_bytes(body[off..off + 8].try_into().ok()?);
            let count = u64::from_le_bytes(body[off + 8..off + 16].try_into().ok()?);
            let distinct = u64::from_le_bytes(body[off + 16..off + 24].try_into().ok()?);
            total += count;
            map.insert(
                p,
                PredicateStats {
                    count,
                    distinct_subjects: distinct,
                },
            );
        }
        Some(StatsSnapshot {
            map,
            total_quads: total,
            checkpoint_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_core::{TemporalKey, Timestamp};
    use tempfile::tempdir;

    fn version(s: u64, p: u64, tombstone: bool) -> Result<QuadVersion> {
        Ok(QuadVersion {
            key: TemporalKey {
                graph: AtomId::NONE,
                subject: AtomId::from_raw(s),
                predicate: AtomId::from_raw(p),
                object: AtomId::from_raw(1),
                valid_from: Timestamp::EPOCH,
                valid_to: Timestamp::MAX,
                tx_time: Timestamp::EPOCH,
            },
            tombstone,
        })
    }

    #[test]
    fn collect_counts_and_distincts() {
        let entries = vec![
            version(1, 10, false),
            version(1, 10, false), // same subject again
            version(2, 10, false),
            version(3, 20, false),
            version(4, 20, true), // tombstones don't count
        ];
        let snap = StatsSnapshot::collect(entries.into_iter(), 5).unwrap();
        assert_eq!(snap.total_quads, 4);
        let p10 = snap.predicate(AtomId::from_raw(10)).unwrap();
        assert_eq!(p10.count, 3);
        assert_eq!(p10.distinct_subjects, 2);
        let p20 = snap.predicate(AtomId::from_raw(20)).unwrap();
        assert_eq!(p20.count, 1);
        assert!(snap.predicate(AtomId::from_raw(99)).is_none());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.bin");
        let entries = vec![version(1, 10, false), version(2, 10, false)];
        let snap = StatsSnapshot::collect(entries.into_iter(), 42).unwrap();
        snap.save(&path).unwrap();

        let loaded = StatsSnapshot::load(&path);
        assert_eq!(loaded.checkpoint_tx, 42);
        assert_eq!(loaded.total_quads, 2);
        assert_eq!(
            loaded.predicate(AtomId::from_raw(10)).unwrap().count,
            2
        );
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.bin");
        let snap =
            StatsSnapshot::collect(vec![version(1, 10, false)].into_iter(), 1).unwrap();
        snap.save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let loaded = StatsSnapshot::load(&path);
        assert_eq!(loaded.predicate_count(), 0);
        assert_eq!(loaded.total_quads, 0);
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let loaded = StatsSnapshot::load(&dir.path().join("nope.bin"));
        assert_eq!(loaded.predicate_count(), 0);
    }
}
