//! File Backend Module
//!
//! Single-file, append-only container.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                       │
//! │   Magic: "RTDC" (4) | Version: u16 (2) | Reserved (2)   │
//! │   Created: unix millis u64 (8)                          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record 1                                                │
//! │ ┌─────────┬─────────┬─────────┬───────────────────────┐ │
//! │ │ Seq (8) │ CRC (4) │ Len (4) │ bincode payload       │ │
//! │ └─────────┴─────────┴─────────┴───────────────────────┘ │
//! ├─────────────────────────────────────────────────────────┤
//! │ Record 2 ...                                            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are `Append` (every dataset of one batch), `Attribute` and
//! `Seal`. Because a batch is a single record, a crash can only lose whole
//! batches: recovery drops a torn or corrupt tail and keeps everything before.

mod handle;
mod recovery;

use std::io::Read;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, RtdcError};
use crate::value::Value;

use super::{Chunk, StorageBackend};

pub use handle::FileHandle;
pub use recovery::RecoveryReport;

// =============================================================================
// Shared Constants
// =============================================================================

/// Magic bytes identifying a container file
pub(crate) const MAGIC: &[u8; 4] = b"RTDC";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Reserved (2) + Created (8) = 16 bytes
pub(crate) const HEADER_SIZE: u64 = 16;

/// Record header size: Seq (8) + CRC (4) + Len (4) = 16 bytes
pub(crate) const RECORD_HEADER_SIZE: usize = 16;

/// Maximum payload size of a single record (1 GiB)
pub(crate) const MAX_RECORD_SIZE: u32 = 1 << 30;

// =============================================================================
// Records
// =============================================================================

/// Record as written; borrows the caller's data
#[derive(Debug, Serialize)]
pub(crate) enum RecordRef<'a> {
    Append { datasets: Vec<(&'a str, &'a Chunk)> },
    Attribute {
        section: &'a str,
        key: &'a str,
        value: &'a Value,
    },
    Seal { read_only: bool },
}

/// Record as read back; same encoding as `RecordRef`
#[derive(Debug, Deserialize)]
pub(crate) enum Record {
    Append { datasets: Vec<(String, Chunk)> },
    Attribute {
        section: String,
        key: String,
        value: Value,
    },
    Seal { read_only: bool },
}

/// Frame a record: seq (8) + crc (4) + len (4) + payload
pub(crate) fn encode_record(seq: u64, record: &RecordRef<'_>) -> Result<BytesMut> {
    let payload = bincode::serialize(record)?;
    if payload.len() > MAX_RECORD_SIZE as usize {
        return Err(RtdcError::Serialization(format!(
            "Record too large: {} bytes (max {})",
            payload.len(),
            MAX_RECORD_SIZE
        )));
    }

    let mut frame = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len());
    frame.put_u64_le(seq);
    frame.put_u32_le(crc32fast::hash(&payload));
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(&payload);
    Ok(frame)
}

/// Parsed record header
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordHeader {
    pub seq: u64,
    pub crc: u32,
    pub len: u32,
}

impl RecordHeader {
    pub fn parse(mut bytes: &[u8]) -> Self {
        let seq = bytes.get_u64_le();
        let crc = bytes.get_u32_le();
        let len = bytes.get_u32_le();
        Self { seq, crc, len }
    }
}

/// Encode the file header
pub(crate) fn encode_header(created_millis: u64) -> BytesMut {
    let mut header = BytesMut::with_capacity(HEADER_SIZE as usize);
    header.put_slice(MAGIC);
    header.put_u16_le(VERSION);
    header.put_u16_le(0);
    header.put_u64_le(created_millis);
    header
}

/// Read and validate the file header, returning the creation time
pub(crate) fn read_header<R: Read>(reader: &mut R) -> Result<u64> {
    let mut header = [0u8; HEADER_SIZE as usize];
    reader.read_exact(&mut header).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            RtdcError::Corruption("Incomplete container header".to_string())
        }
        _ => RtdcError::BackendIo(e),
    })?;

    if &header[0..4] != MAGIC {
        return Err(RtdcError::Corruption(format!(
            "Invalid container magic: expected RTDC, got {:?}",
            &header[0..4]
        )));
    }

    let mut rest = &header[4..];
    let version = rest.get_u16_le();
    if version != VERSION {
        return Err(RtdcError::Corruption(format!(
            "Unsupported container version: {}",
            version
        )));
    }
    let _reserved = rest.get_u16_le();
    Ok(rest.get_u64_le())
}

// =============================================================================
// Backend
// =============================================================================

/// Backend storing each container as one append-only file
#[derive(Debug, Clone)]
pub struct FileBackend {
    sync_strategy: SyncStrategy,
}

impl FileBackend {
    pub fn new(sync_strategy: SyncStrategy) -> Self {
        Self { sync_strategy }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sync_strategy)
    }

    /// Verify integrity of a container file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryReport> {
        recovery::verify(path)
    }
}

impl Default for FileBackend {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl StorageBackend for FileBackend {
    type Handle = FileHandle;

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create(&self, path: &Path) -> Result<FileHandle> {
        FileHandle::create(path, self.sync_strategy)
    }

    fn open(&self, path: &Path) -> Result<FileHandle> {
        FileHandle::open(path, self.sync_strategy)
    }
}
