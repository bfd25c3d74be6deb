//! Atom interning: RDF lexical terms to 64-bit ids.
//!
//! Three files back the store:
//!
//! - `atoms.atoms`: append-only payload: an 8-byte file header followed by
//!   `len u32 | utf8_bytes` records. Offset 0 is the sentinel (no record can
//!   start inside the header), so [`AtomId::NONE`] never resolves.
//! - `atoms.offsets`: 8-byte header then packed `u64` record offsets,
//!   indexed by atom id (id 1 is the first entry).
//! - `atoms.atomidx`: open-addressed hash `term hash → atom id` with linear
//!   probing, rewritten at every sync.
//!
//! The payload file is the source of truth. On open, the offsets file is
//! validated against it, records appended after the last offsets sync are
//! recovered by a forward scan, a torn tail is truncated, and a missing or
//! stale hash index is rebuilt from the payload.
//!
//! Reads of the synced region go through a `memmap2` map; bytes appended
//! since the last remap are served from an in-memory tail that starts
//! exactly at the mapped length, so a record is never split across the two.

use crate::fnv::fnv1a64;
use memmap2::Mmap;
use mercury_core::{AtomId, Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic for the payload file: "MATM".
const PAYLOAD_MAGIC: u32 = u32::from_le_bytes(*b"MATM");
/// Magic for the offsets file: "MAOF".
const OFFSETS_MAGIC: u32 = u32::from_le_bytes(*b"MAOF");
/// Magic for the hash index file: "MAIX".
const INDEX_MAGIC: u32 = u32::from_le_bytes(*b"MAIX");

const FORMAT_VERSION: u32 = 1;
const FILE_HEADER_LEN: u64 = 8;
const INDEX_HEADER_LEN: usize = 24;

/// Probe table load factor threshold (percent).
const MAX_LOAD_PERCENT: usize = 70;

#[derive(Clone, Copy, Default)]
struct Slot {
    hash: u64,
    id: u64, // 0 = empty
}

/// The interning store for RDF lexical terms.
pub struct AtomStore {
    index_path: PathBuf,
    payload: File,
    offsets_file: File,
    map: Option<Mmap>,
    mapped_len: u64,
    tail: Vec<u8>,
    payload_len: u64,
    /// `offsets[id]` is the record offset; `offsets[0]` is the sentinel 0.
    offsets: Vec<u64>,
    slots: Vec<Slot>,
    used: usize,
}

impl AtomStore {
    /// Open or create the atom files inside `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let payload_path = dir.join("atoms.atoms");
        let offsets_path = dir.join("atoms.offsets");
        let index_path = dir.join("atoms.atomidx");

        let mut payload = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&payload_path)?;
        let mut offsets_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&offsets_path)?;

        let mut payload_len = payload.seek(SeekFrom::End(0))?;
        let mut offsets = vec![0u64];

        if payload_len < FILE_HEADER_LEN {
            // Fresh file, or a crash before the header landed.
            payload.set_len(0)?;
            payload.seek(SeekFrom::Start(0))?;
            let mut header = [0u8; FILE_HEADER_LEN as usize];
            header[0..4].copy_from_slice(&PAYLOAD_MAGIC.to_le_bytes());
            header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
            payload.write_all(&header)?;
            payload.sync_data()?;
            payload_len = FILE_HEADER_LEN;
            offsets_file.set_len(0)?;
            write_offsets_header(&mut offsets_file)?;
        } else {
            let mut header = [0u8; FILE_HEADER_LEN as usize];
            payload.seek(SeekFrom::Start(0))?;
            payload.read_exact(&mut header)?;
            let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
            if magic != PAYLOAD_MAGIC {
                return Err(Error::corruption("bad atom payload magic"));
            }
            load_offsets(&mut offsets_file, &mut offsets)?;
        }

        let mut store = AtomStore {
            index_path,
            payload,
            offsets_file,
            map: None,
            mapped_len: 0,
            tail: Vec::new(),
            payload_len,
            offsets,
            slots: vec![Slot::default(); 1024],
            used: 0,
        };

        store.validate_and_recover()?;
        store.remap()?;
        if !store.load_index()? {
            store.rebuild_index()?;
        }
        Ok(store)
    }

    /// Number of interned atoms (the reserved id 0 not counted).
    pub fn count(&self) -> u64 {
        (self.offsets.len() - 1) as u64
    }

    /// Payload bytes on disk, headers included.
    pub fn bytes(&self) -> u64 {
        self.payload_len + (self.offsets.len() as u64) * 8
    }

    /// Intern a term, returning its stable id. Idempotent: the same bytes
    /// always yield the same id within a store lifetime and across reopens.
    pub fn intern(&mut self, term: &[u8]) -> Result<AtomId> {
        let hash = fnv1a64(term);
        if let Some(id) = self.find(hash, term)? {
            return Ok(id);
        }
        self.append_atom(hash, term)
    }

    /// Replay path: re-establish `id ↔ term` after a crash. Verifies the
    /// binding if the id already exists; otherwise the id must be the next
    /// one to assign.
    pub fn intern_with_id(&mut self, id: AtomId, term: &[u8]) -> Result<()> {
        let raw = id.raw();
        if raw == 0 {
            return Err(Error::invalid_argument("atom id 0 is reserved"));
        }
        if (raw as usize) < self.offsets.len() {
            let existing = self.resolve(id)?;
            if existing != term {
                return Err(Error::corruption(format!(
                    "replayed atom {} does not match stored term",
                    id
                )));
            }
            return Ok(());
        }
        if raw as usize != self.offsets.len() {
            return Err(Error::corruption(format!(
                "replayed atom {} leaves a gap (next id {})",
                id,
                self.offsets.len()
            )));
        }
        let hash = fnv1a64(term);
        self.append_atom(hash, term)?;
        Ok(())
    }

    /// Borrow the term bytes for an id. Valid while the store is borrowed.
    pub fn resolve(&self, id: AtomId) -> Result<&[u8]> {
        let raw = id.raw() as usize;
        if raw == 0 || raw >= self.offsets.len() {
            return Err(Error::atom_not_found(id));
        }
        self.record_at(self.offsets[raw])
    }

    /// Look up a term without interning it.
    pub fn lookup(&self, term: &[u8]) -> Result<Option<AtomId>> {
        let hash = fnv1a64(term);
        self.find(hash, term)
    }

    /// Fsync payload and offsets, rewrite the hash index, fold the tail into
    /// the map.
    pub fn sync(&mut self) -> Result<()> {
        self.payload.sync_data()?;
        self.offsets_file.sync_data()?;
        self.write_index()?;
        self.remap()?;
        Ok(())
    }

    fn record_at(&self, offset: u64) -> Result<&[u8]> {
        let read = |bytes: &[u8], at: usize| -> Result<(usize, usize)> {
            if at + 4 > bytes.len() {
                return Err(Error::corruption("atom record header out of bounds"));
            }
            let len = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
            if at + 4 + len > bytes.len() {
                return Err(Error::corruption("atom record body out of bounds"));
            }
            Ok((at + 4, len))
        };
        if offset < self.mapped_len {
            let map = self.map.as_ref().expect("mapped region exists");
            let (start, len) = read(&map[..self.mapped_len as usize], offset as usize)?;
            Ok(&map[start..start + len])
        } else {
            let at = (offset - self.mapped_len) as usize;
            let (start, len) = read(&self.tail, at)?;
            Ok(&self.tail[start..start + len])
        }
    }

    fn find(&self, hash: u64, term: &[u8]) -> Result<Option<AtomId>> {
        let mask = self.slots.len() - 1;
        let mut i = (hash as usize) & mask;
        loop {
            let slot = self.slots[i];
            if slot.id == 0 {
                return Ok(None);
            }
            if slot.hash == hash {
                let id = AtomId::from_raw(slot.id);
                if self.resolve(id)? == term {
                    return Ok(Some(id));
                }
            }
            i = (i + 1) & mask;
        }
    }

    fn append_atom(&mut self, hash: u64, term: &[u8]) -> Result<AtomId> {
        if term.len() > u32::MAX as usize {
            return Err(Error::invalid_argument("atom term too large"));
        }
        let id = self.offsets.len() as u64;
        let offset = self.payload_len;

        let mut record = Vec::with_capacity(4 + term.len());
        record.extend_from_slice(&(term.len() as u32).to_le_bytes());
        record.extend_from_slice(term);

        self.payload.seek(SeekFrom::Start(self.payload_len))?;
        self.payload.write_all(&record)?;
        self.tail.extend_from_slice(&record);
        self.payload_len += record.len() as u64;

        self.offsets_file.seek(SeekFrom::End(0))?;
        self.offsets_file.write_all(&offset.to_le_bytes())?;
        self.offsets.push(offset);

        self.insert_slot(hash, id);
        Ok(AtomId::from_raw(id))
    }

    fn insert_slot(&mut self, hash: u64, id: u64) {
        if (self.used + 1) * 100 >= self.slots.len() * MAX_LOAD_PERCENT {
            self.grow_table();
        }
        let mask = self.slots.len() - 1;
        let mut i = (hash as usize) & mask;
        while self.slots[i].id != 0 {
            i = (i + 1) & mask;
        }
        self.slots[i] = Slot { hash, id };
        self.used += 1;
    }

    fn grow_table(&mut self) {
        let new_len = self.slots.len() * 2;
        let old = std::mem::replace(&mut self.slots, vec![Slot::default(); new_len]);
        self.used = 0;
        for slot in old {
            if slot.id != 0 {
                let mask = self.slots.len() - 1;
                let mut i = (slot.hash as usize) & mask;
                while self.slots[i].id != 0 {
                    i = (i + 1) & mask;
                }
                self.slots[i] = slot;
                self.used += 1;
            }
        }
    }

    /// Check every known offset against the payload, recover records the
    /// offsets file missed, and truncate a torn tail.
    fn validate_and_recover(&mut self) -> Result<()> {
        // Drop offsets pointing past the payload (stale offsets file from a
        // future that never happened cannot occur append-only, but guard).
        while let Some(&last) = self.offsets.last() {
            if self.offsets.len() == 1 {
                break;
            }
            if last + 4 <= self.payload_len {
                break;
            }
            self.offsets.pop();
        }

        // End of the last fully-stored record; drop indexed records whose
        // bodies run past the payload.
        let mut end = loop {
            match self.offsets.len() {
                1 => break FILE_HEADER_LEN,
                n => {
                    let last = self.offsets[n - 1];
                    let candidate = last + 4 + self.read_len_at(last)? as u64;
                    if candidate <= self.payload_len {
                        break candidate;
                    }
                    self.offsets.pop();
                }
            }
        };

        // Forward scan for records appended after the last offsets sync.
        let mut recovered = 0u64;
        while end + 4 <= self.payload_len {
            let len = self.read_len_at(end)? as u64;
            if end + 4 + len > self.payload_len {
                break;
            }
            self.offsets.push(end);
            self.offsets_file.seek(SeekFrom::End(0))?;
            self.offsets_file.write_all(&end.to_le_bytes())?;
            end += 4 + len;
            recovered += 1;
        }

        if end < self.payload_len {
            debug!(
                torn_bytes = self.payload_len - end,
                "truncating torn atom payload tail"
            );
            self.payload.set_len(end)?;
            self.payload_len = end;
        }
        if recovered > 0 {
            debug!(recovered, "recovered atom records by payload scan");
        }

        // The offsets file may hold stale entries beyond what we validated.
        let want = FILE_HEADER_LEN + ((self.offsets.len() - 1) as u64) * 8;
        let have = self.offsets_file.seek(SeekFrom::End(0))?;
        if have != want {
            self.offsets_file.set_len(want)?;
        }
        Ok(())
    }

    fn read_len_at(&mut self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.payload.seek(SeekFrom::Start(offset))?;
        self.payload.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn remap(&mut self) -> Result<()> {
        self.map = Some(unsafe { Mmap::map(&self.payload)? });
        self.mapped_len = self.payload_len;
        self.tail.clear();
        Ok(())
    }

    /// Load the on-disk hash index if it matches the current atom count.
    fn load_index(&mut self) -> Result<bool> {
        let mut file = match File::open(&self.index_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut header = [0u8; INDEX_HEADER_LEN];
        if file.read_exact(&mut header).is_err() {
            return Ok(false);
        }
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != INDEX_MAGIC {
            return Ok(false);
        }
        let slot_count = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;
        let entry_count = u64::from_le_bytes(header[16..24].try_into().unwrap());
        if entry_count != self.count() || !slot_count.is_power_of_two() || slot_count == 0 {
            return Ok(false);
        }
        let mut body = vec![0u8; slot_count * 16];
        if file.read_exact(&mut body).is_err() {
            return Ok(false);
        }
        let mut slots = vec![Slot::default(); slot_count];
        for (i, slot) in slots.iter_mut().enumerate() {
            let off = i * 16;
            slot.hash = u64::from_le_bytes(body[off..off + 8].try_into().unwrap());
            slot.id = u64::from_le_bytes(body[off + 8..off + 16].try_into().unwrap());
            if slot.id as usize >= self.offsets.len() {
                // Index refers to atoms the payload does not have: stale.
                return Ok(false);
            }
        }
        self.slots = slots;
        self.used = entry_count as usize;
        Ok(true)
    }

    /// Rebuild the probe table by hashing every term in the payload.
    fn rebuild_index(&mut self) -> Result<()> {
        debug!(atoms = self.count(), "rebuilding atom hash index");
        let mut cap = 1024usize;
        while self.offsets.len() * 100 >= cap * MAX_LOAD_PERCENT {
            cap *= 2;
        }
        self.slots = vec![Slot::default(); cap];
        self.used = 0;
        for raw in 1..self.offsets.len() {
            let id = AtomId::from_raw(raw as u64);
            let hash = fnv1a64(self.resolve(id)?);
            self.insert_slot(hash, raw as u64);
        }
        Ok(())
    }

    /// Rewrite `atoms.atomidx` atomically (temp file + rename).
    fn write_index(&self) -> Result<()> {
        let tmp = self.index_path.with_extension("atomidx.tmp");
        let mut file = File::create(&tmp)?;
        let mut header = [0u8; INDEX_HEADER_LEN];
        header[0..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..16].copy_from_slice(&(self.slots.len() as u64).to_le_bytes());
        header[16..24].copy_from_slice(&self.count().to_le_bytes());
        file.write_all(&header)?;
        let mut body = Vec::with_capacity(self.slots.len() * 16);
        for slot in &self.slots {
            body.extend_from_slice(&slot.hash.to_le_bytes());
            body.extend_from_slice(&slot.id.to_le_bytes());
        }
        file.write_all(&body)?;
        file.sync_data()?;
        std::fs::rename(&tmp, &self.index_path)?;
        Ok(())
    }
}

fn write_offsets_header(file: &mut File) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; FILE_HEADER_LEN as usize];
    header[0..4].copy_from_slice(&OFFSETS_MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    file.write_all(&header)?;
    Ok(())
}

fn load_offsets(file: &mut File, offsets: &mut Vec<u64>) -> Result<()> {
    let len = file.seek(SeekFrom::End(0))?;
    if len < FILE_HEADER_LEN {
        file.set_len(0)?;
        write_offsets_header(file)?;
        return Ok(());
    }
    file.seek(SeekFrom::Start(0))?;
    let mut header = [0u8; FILE_HEADER_LEN as usize];
    file.read_exact(&mut header)?;
    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if magic != OFFSETS_MAGIC {
        return Err(Error::corruption("bad atom offsets magic"));
    }
    let body_len = (len - FILE_HEADER_LEN) as usize & !7;
    let mut body = vec![0u8; body_len];
    file.read_exact(&mut body)?;
    offsets.reserve(body_len / 8);
    for chunk in body.chunks_exact(8) {
        offsets.push(u64::from_le_bytes(chunk.try_into().unwrap()));
    }
    Ok(())
}
