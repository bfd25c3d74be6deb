//! WAL segment files.
//!
//! Segments are named `wal-NNNNNN.seg` with a zero-padded segment number and
//! begin with a 32-byte header. Only the newest segment is writable; a
//! checkpoint rotates to a fresh segment and deletes the superseded ones.
//!
//! # Segment Header
//!
//! ```text
//! ┌────────────┬────────────────┬────────────────┬──────────────────┐
//! │ Magic (4)  │ Format Ver (4) │ Segment No (8) │ Store UUID (16)  │
//! └────────────┴────────────────┴────────────────┴──────────────────┘
//! ```
//!
//! The store UUID ties segments to the store that wrote them; a mismatch on
//! open means the directory holds segments from two different stores.

use mercury_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a WAL segment file: "MWAL".
pub const SEGMENT_MAGIC: [u8; 4] = *b"MWAL";

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 32;

/// Validated segment file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic bytes.
    pub magic: [u8; 4],
    /// Format version.
    pub format_version: u32,
    /// Monotonically increasing segment number.
    pub segment_number: u64,
    /// UUID of the owning store.
    pub store_uuid: [u8; 16],
}

impl SegmentHeader {
    /// Header for a new segment.
    pub fn new(segment_number: u64, store_uuid: [u8; 16]) -> Self {
        SegmentHeader {
            magic: SEGMENT_MAGIC,
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
            store_uuid,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.segment_number.to_le_bytes());
        bytes[16..32].copy_from_slice(&self.store_uuid);
        bytes
    }

    /// Deserialize and validate magic and version.
    pub fn from_bytes(bytes: &[u8; SEGMENT_HEADER_SIZE]) -> Result<Self> {
        let header = SegmentHeader {
            magic: bytes[0..4].try_into().unwrap(),
            format_version: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            segment_number: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            store_uuid: bytes[16..32].try_into().unwrap(),
        };
        if header.magic != SEGMENT_MAGIC {
            return Err(Error::corruption("bad WAL segment magic"));
        }
        if header.format_version != SEGMENT_FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported WAL segment format version {}",
                header.format_version
            )));
        }
        Ok(header)
    }
}

/// An open segment file.
#[derive(Debug)]
pub struct WalSegment {
    file: File,
    header: SegmentHeader,
    write_position: u64,
    path: PathBuf,
}

impl WalSegment {
    /// Create a new segment, writing and syncing its header.
    pub fn create(dir: &Path, segment_number: u64, store_uuid: [u8; 16]) -> Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let header = SegmentHeader::new(segment_number, store_uuid);
        file.write_all(&header.to_bytes())?;
        file.sync_data()?;
        Ok(WalSegment {
            file,
            header,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
        })
    }

    /// Open an existing segment positioned at its end for appending.
    pub fn open(dir: &Path, segment_number: u64) -> Result<Self> {
        let path = Self::segment_path(dir, segment_number);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_bytes)
            .map_err(|_| Error::corruption("WAL segment shorter than its header"))?;
        let header = SegmentHeader::from_bytes(&header_bytes)?;
        if header.segment_number != segment_number {
            return Err(Error::corruption(format!(
                "WAL segment number mismatch: file says {}, name says {}",
                header.segment_number, segment_number
            )));
        }
        let write_position = file.seek(SeekFrom::End(0))?;
        Ok(WalSegment {
            file,
            header,
            write_position,
            path,
        })
    }

    /// Path for a segment number: `wal-NNNNNN.seg`.
    pub fn segment_path(dir: &Path, segment_number: u64) -> PathBuf {
        dir.join(format!("wal-{:06}.seg", segment_number))
    }

    /// List segment numbers present in `dir`, ascending.
    pub fn list(dir: &Path) -> Result<Vec<u64>> {
        let mut numbers = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(rest) = name.strip_prefix("wal-") {
                if let Some(num) = rest.strip_suffix(".seg") {
                    if let Ok(n) = num.parse::<u64>() {
                        numbers.push(n);
                    }
                }
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Segment number.
    pub fn segment_number(&self) -> u64 {
        self.header.segment_number
    }

    /// Store UUID from the header.
    pub fn store_uuid(&self) -> [u8; 16] {
        self.header.store_uuid
    }

    /// Current size in bytes, header included.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Append bytes at the end.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.write_position))?;
        self.file.write_all(data)?;
        self.write_position += data.len() as u64;
        Ok(())
    }

    /// Fsync through the last append.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Read the record region (everything after the header).
    pub fn read_records(&mut self) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Truncate at an absolute file position (used to drop a torn tail).
    pub fn truncate(&mut self, position: u64) -> Result<()> {
        self.file.set_len(position)?;
        self.write_position = position;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn header_roundtrip() {
        let header = SegmentHeader::new(12, [0xAB; 16]);
        let bytes = header.to_bytes();
        let parsed = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = SegmentHeader::new(1, [0; 16]).to_bytes();
        bytes[0] = b'X';
        assert!(SegmentHeader::from_bytes(&bytes)
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn path_format() {
        let dir = Path::new("/tmp/wal");
        assert_eq!(
            WalSegment::segment_path(dir, 1),
            PathBuf::from("/tmp/wal/wal-000001.seg")
        );
        assert_eq!(
            WalSegment::segment_path(dir, 424242),
            PathBuf::from("/tmp/wal/wal-424242.seg")
        );
    }

    #[test]
    fn create_append_reopen() {
        let dir = tempdir().unwrap();
        let uuid = [7u8; 16];
        {
            let mut seg = WalSegment::create(dir.path(), 1, uuid).unwrap();
            seg.append(b"hello").unwrap();
            seg.sync().unwrap();
            assert_eq!(seg.size(), SEGMENT_HEADER_SIZE as u64 + 5);
        }
        let mut seg = WalSegment::open(dir.path(), 1).unwrap();
        assert_eq!(seg.segment_number(), 1);
        assert_eq!(seg.store_uuid(), uuid);
        assert_eq!(seg.read_records().unwrap(), b"hello");
    }

    #[test]
    fn number_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let seg = WalSegment::create(dir.path(), 3, [0; 16]).unwrap();
        drop(seg);
        std::fs::rename(
            WalSegment::segment_path(dir.path(), 3),
            WalSegment::segment_path(dir.path(), 4),
        )
        .unwrap();
        assert!(WalSegment::open(dir.path(), 4)
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn listing_sorts_numerically() {
        let dir = tempdir().unwrap();
        for n in [3u64, 1, 2] {
            WalSegment::create(dir.path(), n, [0; 16]).unwrap();
        }
        std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
        assert_eq!(WalSegment::list(dir.path()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let mut seg = WalSegment::create(dir.path(), 1, [0; 16]).unwrap();
        seg.append(b"keep-me-drop-me").unwrap();
        seg.truncate(SEGMENT_HEADER_SIZE as u64 + 7).unwrap();
        assert_eq!(seg.read_records().unwrap(), b"keep-me");
    }
}
