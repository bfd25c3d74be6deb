//! Range-scan cursor walking the leaf chain.

use crate::cache::PageCache;
use crate::page::{node, PAYLOAD_TOMBSTONE};
use mercury_core::{QuadVersion, Result, TemporalKey};

/// Streaming cursor over a key range, in key order.
///
/// Holds a position (leaf page id + slot) rather than page borrows, so the
/// cache is free to evict and fault pages between `next` calls. Only valid
/// under the store's shared lock: the tree must not mutate while a cursor is
/// live.
pub struct TreeCursor<'a> {
    cache: &'a PageCache,
    page_id: u64,
    slot: usize,
    upper: TemporalKey,
    exhausted: bool,
}

impl<'a> TreeCursor<'a> {
    pub(crate) fn new(cache: &'a PageCache, page_id: u64, slot: usize, upper: TemporalKey) -> Self {
        TreeCursor {
            cache,
            page_id,
            slot,
            upper,
            exhausted: false,
        }
    }

    pub(crate) fn exhausted(cache: &'a PageCache, upper: TemporalKey) -> Self {
        TreeCursor {
            cache,
            page_id: 0,
            slot: 0,
            upper,
            exhausted: true,
        }
    }

    /// Advance and return the next entry, or `None` past the upper bound.
    ///
    /// After an error or exhaustion every further call returns `None`.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<QuadVersion>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            let step = self.cache.with_page(self.page_id, |p| {
                let n = node::count(p);
                if self.slot >= n {
                    // Step to the right sibling.
                    return Step::Sibling(node::next(p));
                }
                let key = node::slot_key(p, self.slot);
                let payload = node::slot_payload(p, self.slot);
                Step::Entry(key, payload)
            });
            let step = match step {
                Ok(s) => s,
                Err(e) => {
                    self.exhausted = true;
                    return Err(e);
                }
            };
            match step {
                Step::Sibling(0) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                Step::Sibling(next) => {
                    self.page_id = next;
                    self.slot = 0;
                }
                Step::Entry(key, payload) => {
                    if key > self.upper {
                        self.exhausted = true;
                        return Ok(None);
                    }
                    self.slot += 1;
                    return Ok(Some(QuadVersion {
                        key,
                        tombstone: payload & PAYLOAD_TOMBSTONE != 0,
                    }));
                }
            }
        }
    }
}

enum Step {
    Sibling(u64),
    Entry(TemporalKey, u64),
}
