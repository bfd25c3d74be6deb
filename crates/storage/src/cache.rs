//! Fixed-frame page cache over the B+tree file.
//!
//! A bounded pool of in-memory frames fronts `gspo.tdb`. Eviction is clock
//! (second chance); a dirty victim is written back and synced before its
//! frame is reused. Access is closure-based: [`PageCache::with_page`] and
//! [`PageCache::with_page_mut`] run the caller's closure while the frame is
//! held, so eviction can never invalidate a borrow. The closures must not
//! re-enter the cache; tree operations are written as loops over single-page
//! accesses for exactly this reason.

use crate::page::StoreHeader;
use mercury_core::{Error, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug)]
struct Frame {
    page_id: u64,
    data: Box<[u8]>,
    dirty: bool,
    referenced: bool,
    valid: bool,
}

#[derive(Debug)]
struct CacheInner {
    file: File,
    frames: Vec<Frame>,
    table: FxHashMap<u64, usize>,
    hand: usize,
    page_count: u64,
}

/// Fixed-size page buffer with clock eviction.
#[derive(Debug)]
pub struct PageCache {
    page_size: usize,
    inner: Mutex<CacheInner>,
}

impl PageCache {
    /// Open or create the tree file.
    ///
    /// A fresh file gets a header page; an existing file has its header
    /// validated (magic, version) and the page count restored from it.
    pub fn open(path: &Path, page_size: usize, frame_count: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_len = file.seek(SeekFrom::End(0))?;
        let frames = (0..frame_count)
            .map(|_| Frame {
                page_id: 0,
                data: vec![0u8; page_size].into_boxed_slice(),
                dirty: false,
                referenced: false,
                valid: false,
            })
            .collect();

        let mut inner = CacheInner {
            file,
            frames,
            table: FxHashMap::default(),
            hand: 0,
            page_count: 1,
        };

        if file_len == 0 {
            let mut page = vec![0u8; page_size];
            StoreHeader::new().encode_to(&mut page);
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.write_all(&page)?;
            inner.file.sync_data()?;
        } else {
            if file_len < page_size as u64 {
                return Err(Error::corruption("tree file shorter than one page"));
            }
            let mut page = vec![0u8; page_size];
            inner.file.seek(SeekFrom::Start(0))?;
            inner.file.read_exact(&mut page)?;
            let header = StoreHeader::decode(&page)?;
            inner.page_count = header.page_count;
        }

        Ok(PageCache {
            page_size,
            inner: Mutex::new(inner),
        })
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages currently allocated (header included).
    pub fn page_count(&self) -> u64 {
        self.inner.lock().page_count
    }

    /// Run `f` over a shared view of the page.
    pub fn with_page<R>(&self, page_id: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let mut inner = self.inner.lock();
        let idx = self.locate(&mut inner, page_id, false)?;
        Ok(f(&inner.frames[idx].data))
    }

    /// Run `f` over an exclusive view of the page, marking it dirty.
    pub fn with_page_mut<R>(&self, page_id: u64, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut inner = self.inner.lock();
        let idx = self.locate(&mut inner, page_id, false)?;
        inner.frames[idx].dirty = true;
        Ok(f(&mut inner.frames[idx].data))
    }

    /// Allocate a fresh zeroed page at the end of the file.
    ///
    /// The page exists only in cache until written back; the file grows on
    /// write-back or [`PageCache::flush_all`].
    pub fn allocate(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let page_id = inner.page_count;
        inner.page_count += 1;
        let idx = self.locate(&mut inner, page_id, true)?;
        let frame = &mut inner.frames[idx];
        frame.data.fill(0);
        frame.dirty = true;
        Ok(page_id)
    }

    /// Write back every dirty frame and sync the file.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let page_size = self.page_size;
        for idx in 0..inner.frames.len() {
            if inner.frames[idx].valid && inner.frames[idx].dirty {
                let page_id = inner.frames[idx].page_id;
                let offset = page_id * page_size as u64;
                inner.file.seek(SeekFrom::Start(offset))?;
                // Split borrow: take the data pointer before the file write.
                let data = std::mem::take(&mut inner.frames[idx].data);
                let res = inner.file.write_all(&data);
                inner.frames[idx].data = data;
                res?;
                inner.frames[idx].dirty = false;
            }
        }
        inner.file.sync_data()?;
        Ok(())
    }

    /// Decode the store header from page 0.
    pub fn read_header(&self) -> Result<StoreHeader> {
        self.with_page(0, |page| StoreHeader::decode(page))?
    }

    /// Encode the store header into page 0 (dirties it).
    pub fn write_header(&self, header: &StoreHeader) -> Result<()> {
        self.with_page_mut(0, |page| header.encode_to(page))
    }

    /// Find or fault in the frame for `page_id`. `fresh` skips the disk read
    /// for pages that have never been written.
    fn locate(&self, inner: &mut CacheInner, page_id: u64, fresh: bool) -> Result<usize> {
        if !fresh && page_id >= inner.page_count {
            return Err(Error::page_not_found(page_id));
        }
        if let Some(&idx) = inner.table.get(&page_id) {
            inner.frames[idx].referenced = true;
            return Ok(idx);
        }

        let idx = self.evict_one(inner)?;
        if !fresh {
            let offset = page_id * self.page_size as u64;
            let file_len = inner.file.seek(SeekFrom::End(0))?;
            let mut data = std::mem::take(&mut inner.frames[idx].data);
            if offset + self.page_size as u64 <= file_len {
                inner.file.seek(SeekFrom::Start(offset))?;
                let res = inner.file.read_exact(&mut data);
                if let Err(e) = res {
                    inner.frames[idx].data = data;
                    return Err(e.into());
                }
            } else {
                // Allocated but never flushed: starts zeroed.
                data.fill(0);
            }
            inner.frames[idx].data = data;
        }

        let frame = &mut inner.frames[idx];
        frame.page_id = page_id;
        frame.dirty = false;
        frame.referenced = true;
        frame.valid = true;
        inner.table.insert(page_id, idx);
        Ok(idx)
    }

    /// Clock sweep: find a reusable frame, writing back a dirty victim.
    fn evict_one(&self, inner: &mut CacheInner) -> Result<usize> {
        let n = inner.frames.len();
        // Two full sweeps guarantee a victim: the first clears reference
        // bits, the second finds an unreferenced frame.
        for _ in 0..2 * n + 1 {
            let idx = inner.hand;
            inner.hand = (inner.hand + 1) % n;
            if !inner.frames[idx].valid {
                return Ok(idx);
            }
            if inner.frames[idx].referenced {
                inner.frames[idx].referenced = false;
                continue;
            }
            if inner.frames[idx].dirty {
                let page_id = inner.frames[idx].page_id;
                let offset = page_id * self.page_size as u64;
                inner.file.seek(SeekFrom::Start(offset))?;
                let data = std::mem::take(&mut inner.frames[idx].data);
                let res = inner.file.write_all(&data);
                inner.frames[idx].data = data;
                res?;
                inner.file.sync_data()?;
                inner.frames[idx].dirty = false;
            }
            let old_id = inner.frames[idx].page_id;
            inner.table.remove(&old_id);
            inner.frames[idx].valid = false;
            return Ok(idx);
        }
        Err(Error::concurrency("page cache exhausted"))
    }
}
