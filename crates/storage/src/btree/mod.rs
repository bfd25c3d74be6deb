//! The GSPO-ordered B+tree.
//!
//! One tree per store, keyed by [`TemporalKey`] in lexicographic order.
//! Leaves hold `(key, payload slot)` pairs and chain through sibling
//! pointers; internal nodes hold separator keys and child page ids. Inserts
//! descend from the root splitting full nodes pre-emptively (median key
//! promoted), so a parent always has room for the separator coming up from a
//! child split.
//!
//! The tree mutates only under the store's exclusive lock; cursors run under
//! the shared lock and observe a consistent snapshot.

mod cursor;

pub use cursor::TreeCursor;

use crate::cache::PageCache;
use crate::page::{self, node, KIND_INTERNAL, KIND_LEAF, PAYLOAD_TOMBSTONE};
use mercury_core::{Error, Result, TemporalKey};
use std::sync::Arc;

/// Outcome of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was new and has been inserted.
    Inserted,
    /// An entry with the identical temporal key already exists; no-op.
    AlreadyPresent,
}

/// Structural statistics reported by [`GspoTree::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    /// Live slot count (tombstones included).
    pub entries: u64,
    /// Levels from root to leaf; 0 for an empty tree.
    pub height: u32,
    /// Pages allocated in the file, header page included.
    pub pages: u64,
}

/// The GSPO temporal-key index.
pub struct GspoTree {
    cache: Arc<PageCache>,
    max_slots: usize,
    root: u64,
    height: u32,
    entries: u64,
}

impl GspoTree {
    /// Load tree metadata from the store header.
    pub fn load(cache: Arc<PageCache>) -> Result<Self> {
        let header = cache.read_header()?;
        let max_slots = page::max_slots(cache.page_size());
        if max_slots < 4 {
            return Err(Error::invalid_argument(format!(
                "page size {} holds fewer than 4 slots",
                cache.page_size()
            )));
        }
        Ok(GspoTree {
            cache,
            max_slots,
            root: header.root_page_id,
            height: header.height,
            entries: header.entries,
        })
    }

    /// Write tree metadata into the header page (dirty; flushed with the
    /// rest of the cache).
    pub fn sync_header(&self, checkpoint_tx: u64) -> Result<()> {
        let mut header = self.cache.read_header()?;
        header.root_page_id = self.root;
        header.height = self.height;
        header.entries = self.entries;
        header.page_count = self.cache.page_count();
        header.checkpoint_tx = checkpoint_tx;
        self.cache.write_header(&header)
    }

    /// Structural statistics.
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            entries: self.entries,
            height: self.height,
            pages: self.cache.page_count(),
        }
    }

    /// Number of entries (tombstones included).
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Insert an entry. Duplicate full keys are a no-op reported as
    /// [`InsertOutcome::AlreadyPresent`].
    pub fn insert(&mut self, key: &TemporalKey, tombstone: bool) -> Result<InsertOutcome> {
        let payload = if tombstone { PAYLOAD_TOMBSTONE } else { 0 };

        if self.root == 0 {
            let leaf = self.cache.allocate()?;
            self.cache.with_page_mut(leaf, |p| {
                node::init(p, KIND_LEAF);
                node::insert_slot_at(p, 0, key, payload);
            })?;
            self.root = leaf;
            self.height = 1;
            self.entries = 1;
            return Ok(InsertOutcome::Inserted);
        }

        // Grow upward if the root itself is full.
        if self.node_is_full(self.root)? {
            let new_root = self.cache.allocate()?;
            let old_root = self.root;
            self.cache.with_page_mut(new_root, |p| {
                node::init(p, KIND_INTERNAL);
                node::set_next(p, old_root);
            })?;
            self.split_child(new_root, old_root)?;
            self.root = new_root;
            self.height += 1;
        }

        // Descend, splitting any full child before stepping into it.
        let mut page_id = self.root;
        loop {
            let (kind, _) = self
                .cache
                .with_page(page_id, |p| (node::kind(p), node::count(p)))?;
            if kind == KIND_LEAF {
                break;
            }
            let mut child = self.cache.with_page(page_id, |p| node::child_for(p, key))?;
            if self.node_is_full(child)? {
                self.split_child(page_id, child)?;
                child = self.cache.with_page(page_id, |p| node::child_for(p, key))?;
            }
            page_id = child;
        }

        let outcome = self.cache.with_page_mut(page_id, |p| match node::search(p, key) {
            Ok(_) => InsertOutcome::AlreadyPresent,
            Err(i) => {
                node::insert_slot_at(p, i, key, payload);
                InsertOutcome::Inserted
            }
        })?;
        if outcome == InsertOutcome::Inserted {
            self.entries += 1;
        }
        Ok(outcome)
    }

    /// Stream entries with `lower <= key <= upper` in key order.
    pub fn range_scan(&self, lower: TemporalKey, upper: TemporalKey) -> Result<TreeCursor<'_>> {
        if self.root == 0 {
            return Ok(TreeCursor::exhausted(&self.cache, upper));
        }
        let mut page_id = self.root;
        loop {
            let kind = self.cache.with_page(page_id, node::kind)?;
            if kind == KIND_LEAF {
                break;
            }
            page_id = self
                .cache
                .with_page(page_id, |p| node::child_for(p, &lower))?;
        }
        let slot = self
            .cache
            .with_page(page_id, |p| match node::search(p, &lower) {
                Ok(i) => i,
                Err(i) => i,
            })?;
        Ok(TreeCursor::new(&self.cache, page_id, slot, upper))
    }

    fn node_is_full(&self, page_id: u64) -> Result<bool> {
        let count = self.cache.with_page(page_id, node::count)?;
        Ok(count >= self.max_slots)
    }

    /// Split a full child, inserting the promoted separator into `parent`.
    /// The caller guarantees the parent is not full.
    fn split_child(&mut self, parent: u64, child: u64) -> Result<()> {
        let page_size = self.cache.page_size();
        let snapshot = self
            .cache
            .with_page(child, |p| p.to_vec())?;
        let kind = node::kind(&snapshot);
        let n = node::count(&snapshot);
        let mid = n / 2;

        let right_id = self.cache.allocate()?;
        let mut right = vec![0u8; page_size];
        node::init(&mut right, kind);

        let sep;
        if kind == KIND_LEAF {
            // Right sibling takes slots mid..n; the separator is copied, not
            // removed (B+tree leaf split).
            sep = node::slot_key(&snapshot, mid);
            for i in mid..n {
                let k = node::slot_key(&snapshot, i);
                let v = node::slot_payload(&snapshot, i);
                node::insert_slot_at(&mut right, i - mid, &k, v);
            }
            node::set_next(&mut right, node::next(&snapshot));
            self.cache.with_page_mut(child, |p| {
                node::set_count(p, mid);
                node::set_next(p, right_id);
            })?;
        } else {
            // The median key moves up; its child becomes the right node's
            // leftmost child.
            sep = node::slot_key(&snapshot, mid);
            node::set_next(&mut right, node::slot_payload(&snapshot, mid));
            for i in mid + 1..n {
                let k = node::slot_key(&snapshot, i);
                let v = node::slot_payload(&snapshot, i);
                node::insert_slot_at(&mut right, i - mid - 1, &k, v);
            }
            self.cache.with_page_mut(child, |p| node::set_count(p, mid))?;
        }

        self.cache
            .with_page_mut(right_id, |p| p.copy_from_slice(&right))?;

        self.cache.with_page_mut(parent, |p| {
            let pos = match node::search(p, &sep) {
                // Separators are unique: an exact hit cannot happen because
                // the parent never yet contains this key.
                Ok(i) => i,
                Err(i) => i,
            };
            node::insert_slot_at(p, pos, &sep, right_id);
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercury_core::{AtomId, Timestamp};
    use std::path::Path;
    use tempfile::tempdir;

    fn key(s: u64) -> TemporalKey {
        TemporalKey {
            graph: AtomId::NONE,
            subject: AtomId::from_raw(s),
            predicate: AtomId::from_raw(1),
            object: AtomId::from_raw(1),
            valid_from: Timestamp::EPOCH,
            valid_to: Timestamp::MAX,
            tx_time: Timestamp::EPOCH,
        }
    }

    fn open_tree(dir: &Path) -> GspoTree {
        let cache = Arc::new(PageCache::open(&dir.join("gspo.tdb"), 4096, 32).unwrap());
        GspoTree::load(cache).unwrap()
    }

    fn collect_subjects(tree: &GspoTree) -> Vec<u64> {
        let mut cursor = tree
            .range_scan(TemporalKey::MIN, TemporalKey::MAX)
            .unwrap();
        let mut out = Vec::new();
        while let Some(v) = cursor.next().unwrap() {
            out.push(v.key.subject.raw());
        }
        out
    }

    #[test]
    fn empty_tree_scans_empty() {
        let dir = tempdir().unwrap();
        let tree = open_tree(dir.path());
        assert_eq!(collect_subjects(&tree), Vec::<u64>::new());
        assert_eq!(tree.stats().height, 0);
    }

    #[test]
    fn single_insert_and_scan() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        assert_eq!(tree.insert(&key(5), false).unwrap(), InsertOutcome::Inserted);
        assert_eq!(collect_subjects(&tree), vec![5]);
        assert_eq!(tree.stats().entries, 1);
        assert_eq!(tree.stats().height, 1);
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        tree.insert(&key(5), false).unwrap();
        assert_eq!(
            tree.insert(&key(5), false).unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(tree.stats().entries, 1);
    }

    #[test]
    fn sorted_stream_in_sorted_stream_out() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        // Enough to force several leaf splits and an internal level at
        // 63 slots per 4 KiB page.
        let n = 1000u64;
        for s in 1..=n {
            tree.insert(&key(s), false).unwrap();
        }
        let subjects = collect_subjects(&tree);
        assert_eq!(subjects, (1..=n).collect::<Vec<_>>());
        assert!(tree.stats().height >= 2);
        assert_eq!(tree.stats().entries, n);
    }

    #[test]
    fn reverse_insert_scans_sorted() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        for s in (1..=500u64).rev() {
            tree.insert(&key(s), false).unwrap();
        }
        assert_eq!(collect_subjects(&tree), (1..=500).collect::<Vec<_>>());
    }

    #[test]
    fn random_insert_scans_sorted() {
        use rand::seq::SliceRandom;
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        let mut subjects: Vec<u64> = (1..=2000).collect();
        subjects.shuffle(&mut rand::thread_rng());
        for &s in &subjects {
            tree.insert(&key(s), false).unwrap();
        }
        assert_eq!(collect_subjects(&tree), (1..=2000).collect::<Vec<_>>());
    }

    #[test]
    fn bounded_range_scan() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        for s in 1..=300u64 {
            tree.insert(&key(s), false).unwrap();
        }
        let mut cursor = tree.range_scan(key(100), key(200)).unwrap();
        let mut out = Vec::new();
        while let Some(v) = cursor.next().unwrap() {
            out.push(v.key.subject.raw());
        }
        assert_eq!(out, (100..=200).collect::<Vec<_>>());
    }

    #[test]
    fn tombstone_flag_survives() {
        let dir = tempdir().unwrap();
        let mut tree = open_tree(dir.path());
        tree.insert(&key(1), false).unwrap();
        tree.insert(&key(2), true).unwrap();
        let mut cursor = tree
            .range_scan(TemporalKey::MIN, TemporalKey::MAX)
            .unwrap();
        let a = cursor.next().unwrap().unwrap();
        let b = cursor.next().unwrap().unwrap();
        assert!(!a.tombstone);
        assert!(b.tombstone);
    }

    #[test]
    fn metadata_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut tree = open_tree(dir.path());
            for s in 1..=500u64 {
                tree.insert(&key(s), false).unwrap();
            }
            tree.sync_header(0).unwrap();
            tree.cache.flush_all().unwrap();
        }
        let tree = open_tree(dir.path());
        assert_eq!(tree.stats().entries, 500);
        assert_eq!(collect_subjects(&tree), (1..=500).collect::<Vec<_>>());
    }
}
