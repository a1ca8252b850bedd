//! Container recovery
//!
//! Replays the records of a container file into an in-memory index.
//!
//! Scanning stops at the first record that is incomplete, fails its
//! checksum, cannot be decoded or is out of sequence. Everything from that
//! point on is a torn tail; `open` truncates it, `verify` only reports it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, RtdcError};
use crate::storage::{Chunk, DatasetInfo};
use crate::value::Value;

use super::{read_header, Record, RecordHeader, HEADER_SIZE, MAX_RECORD_SIZE, RECORD_HEADER_SIZE};

/// Result of replaying a container file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of intact records replayed
    pub records_recovered: u64,

    /// Bytes past the last intact record
    pub bytes_truncated: u64,

    /// Whether a torn tail was found (and, on open, removed)
    pub was_truncated: bool,

    /// Whether the last intact record sealed the container
    pub sealed: bool,
}

/// Index entry for one dataset: its metadata and the records holding its chunks
#[derive(Debug, Clone)]
pub(super) struct DatasetIndex {
    pub info: DatasetInfo,
    pub offsets: Vec<u64>,
}

/// In-memory view of a container file
#[derive(Debug, Clone)]
pub(super) struct ContainerIndex {
    pub datasets: BTreeMap<String, DatasetIndex>,
    pub attributes: BTreeMap<(String, String), Value>,
    pub sealed: bool,
    pub next_seq: u64,
    pub end_offset: u64,
}

impl ContainerIndex {
    pub fn empty() -> Self {
        Self {
            datasets: BTreeMap::new(),
            attributes: BTreeMap::new(),
            sealed: false,
            next_seq: 1,
            end_offset: HEADER_SIZE,
        }
    }

    /// Check chunks against the existing datasets without applying them
    pub fn check_append<'a, I>(&self, chunks: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Chunk)>,
    {
        for (name, chunk) in chunks {
            if let Some(dataset) = self.datasets.get(name) {
                dataset.info.check_append(name, chunk)?;
            }
        }
        Ok(())
    }

    /// Record that the chunks of an `Append` record at `offset` were written
    pub fn apply_append<'a, I>(&mut self, offset: u64, chunks: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a Chunk)>,
    {
        for (name, chunk) in chunks {
            match self.datasets.get_mut(name) {
                Some(dataset) => {
                    dataset.info.check_append(name, chunk)?;
                    dataset.info.len += chunk.len();
                    if dataset.offsets.last() != Some(&offset) {
                        dataset.offsets.push(offset);
                    }
                }
                None => {
                    self.datasets.insert(
                        name.to_string(),
                        DatasetIndex {
                            info: DatasetInfo::from_chunk(chunk),
                            offsets: vec![offset],
                        },
                    );
                }
            }
        }
        self.sealed = false;
        Ok(())
    }

    fn apply(&mut self, offset: u64, record: Record) -> Result<()> {
        match record {
            Record::Append { datasets } => self
                .apply_append(offset, datasets.iter().map(|(n, c)| (n.as_str(), c)))
                .map_err(|e| {
                    RtdcError::Corruption(format!(
                        "record at offset {} is inconsistent: {}",
                        offset, e
                    ))
                }),
            Record::Attribute { section, key, value } => {
                self.attributes.insert((section, key), value);
                self.sealed = false;
                Ok(())
            }
            Record::Seal { .. } => {
                self.sealed = true;
                Ok(())
            }
        }
    }
}

enum Frame {
    End,
    Torn(&'static str),
    Record { seq: u64, size: u64, record: Record },
}

fn read_frame<R: Read>(reader: &mut R, offset: u64, file_len: u64) -> Result<Frame> {
    let remaining = file_len - offset;
    if remaining == 0 {
        return Ok(Frame::End);
    }
    if remaining < RECORD_HEADER_SIZE as u64 {
        return Ok(Frame::Torn("partial record header"));
    }

    let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = RecordHeader::parse(&header_bytes);

    if header.len > MAX_RECORD_SIZE {
        return Ok(Frame::Torn("record length out of range"));
    }
    let size = RECORD_HEADER_SIZE as u64 + header.len as u64;
    if size > remaining {
        return Ok(Frame::Torn("partial record payload"));
    }

    let mut payload = vec![0u8; header.len as usize];
    reader.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != header.crc {
        return Ok(Frame::Torn("record checksum mismatch"));
    }

    match bincode::deserialize::<Record>(&payload) {
        Ok(record) => Ok(Frame::Record {
            seq: header.seq,
            size,
            record,
        }),
        Err(_) => Ok(Frame::Torn("undecodable record payload")),
    }
}

/// Replay `file` from the start; with `truncate`, cut off a torn tail
pub(super) fn recover(file: &mut File, truncate: bool) -> Result<(ContainerIndex, RecoveryReport)> {
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;

    let mut index = ContainerIndex::empty();
    let mut records_recovered = 0;
    let mut torn = None;

    {
        let mut reader = BufReader::new(&*file);
        read_header(&mut reader)?;

        loop {
            match read_frame(&mut reader, index.end_offset, file_len)? {
                Frame::End => break,
                Frame::Torn(reason) => {
                    torn = Some(reason);
                    break;
                }
                Frame::Record { seq, .. } if seq != index.next_seq => {
                    torn = Some("record out of sequence");
                    break;
                }
                Frame::Record { size, record, .. } => {
                    index.apply(index.end_offset, record)?;
                    index.end_offset += size;
                    index.next_seq += 1;
                    records_recovered += 1;
                }
            }
        }
    }

    let bytes_truncated = file_len - index.end_offset;
    if let Some(reason) = torn {
        tracing::warn!(
            "Torn container tail ({}): {} bytes after offset {}{}",
            reason,
            bytes_truncated,
            index.end_offset,
            if truncate { ", truncating" } else { "" }
        );
        if truncate {
            file.set_len(index.end_offset)?;
            file.sync_all()?;
        }
    }

    let report = RecoveryReport {
        records_recovered,
        bytes_truncated,
        was_truncated: torn.is_some(),
        sealed: index.sealed,
    };
    Ok((index, report))
}

/// Scan a container without modifying it
pub(super) fn verify(path: &Path) -> Result<RecoveryReport> {
    let mut file = File::open(path)?;
    let (_, report) = recover(&mut file, false)?;
    Ok(report)
}

/// Read the record starting at `offset`
pub(super) fn read_record_at(file: &mut File, offset: u64) -> Result<Record> {
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(&*file);

    let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = RecordHeader::parse(&header_bytes);
    if header.len > MAX_RECORD_SIZE {
        return Err(RtdcError::Corruption(format!(
            "record at offset {} has length {} (max {})",
            offset, header.len, MAX_RECORD_SIZE
        )));
    }

    let mut payload = vec![0u8; header.len as usize];
    reader.read_exact(&mut payload)?;
    if crc32fast::hash(&payload) != header.crc {
        return Err(RtdcError::Corruption(format!(
            "checksum mismatch in record at offset {}",
            offset
        )));
    }
    Ok(bincode::deserialize(&payload)?)
}
