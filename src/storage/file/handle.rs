//! File container handle
//!
//! Appends framed records through a `BufWriter`, flushing to the OS after
//! every record and fsyncing per `SyncStrategy`. Dataset lengths, layouts and
//! attributes are served from the in-memory index; dataset contents are read
//! back from the record offsets the index remembers.
//!
//! A handle holds an exclusive advisory lock on its file until it is closed
//! or dropped, so a second handle on the same container fails with
//! `ContainerBusy` instead of writing over the first one's records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SyncStrategy;
use crate::error::{Result, RtdcError};
use crate::storage::{Chunk, ContainerHandle, DatasetInfo};
use crate::value::Value;

use super::recovery::{self, ContainerIndex, RecoveryReport};
use super::{encode_header, encode_record, Record, RecordRef};

/// Writable handle to a container file
pub struct FileHandle {
    path: PathBuf,
    writer: BufWriter<File>,
    index: ContainerIndex,
    sync_strategy: SyncStrategy,
    unsynced: usize,
    read_only: bool,
    recovery: Option<RecoveryReport>,
}

impl FileHandle {
    /// Create a new container file with an empty record log
    pub(super) fn create(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => RtdcError::ContainerExists(path.to_path_buf()),
                _ => RtdcError::BackendIo(e),
            })?;

        lock_exclusive(&file, path)?;

        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut writer = BufWriter::new(file);
        writer.write_all(&encode_header(created))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        tracing::debug!("Created container file {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            index: ContainerIndex::empty(),
            sync_strategy,
            unsynced: 0,
            read_only: false,
            recovery: None,
        })
    }

    /// Open an existing container file, recovering from a torn tail
    pub(super) fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RtdcError::ContainerNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        // Checked explicitly: privileged processes may open read-only files anyway
        if metadata.permissions().readonly() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("container {:?} is read-only", path),
            )
            .into());
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        // Locked before recovery may truncate the tail
        lock_exclusive(&file, path)?;
        let (index, report) = recovery::recover(&mut file, true)?;
        file.seek(SeekFrom::Start(index.end_offset))?;

        tracing::debug!(
            "Opened container file {:?}: {} records, {} datasets",
            path,
            report.records_recovered,
            index.datasets.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            index,
            sync_strategy,
            unsynced: 0,
            read_only: false,
            recovery: Some(report),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Report of the recovery scan, if this handle was opened from an existing file
    pub fn recovery_report(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    /// Total bytes written so far (header included)
    pub fn size(&self) -> u64 {
        self.index.end_offset
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(
                io::Error::new(io::ErrorKind::PermissionDenied, "container is read-only").into(),
            );
        }
        Ok(())
    }

    /// Append one framed record, returning its offset
    fn write_record(&mut self, record: &RecordRef<'_>) -> Result<u64> {
        let frame = encode_record(self.index.next_seq, record)?;
        let offset = self.index.end_offset;

        self.writer.write_all(&frame)?;
        self.writer.flush()?;

        self.index.end_offset += frame.len() as u64;
        self.index.next_seq += 1;
        self.unsynced += 1;

        let should_sync = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNRecords { count } => self.unsynced >= count,
        };
        if should_sync {
            self.sync()?;
        }

        Ok(offset)
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }
}

/// Take a non-blocking exclusive `flock` on `file`
///
/// The lock belongs to the open file description and is released when the
/// handle's file is closed.
#[cfg(unix)]
fn lock_exclusive(file: &File, path: &Path) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Err(RtdcError::ContainerBusy(path.to_path_buf()));
        }
        return Err(err.into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _path: &Path) -> Result<()> {
    Ok(())
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("datasets", &self.index.datasets.len())
            .field("records", &(self.index.next_seq - 1))
            .field("sealed", &self.index.sealed)
            .finish()
    }
}

impl ContainerHandle for FileHandle {
    fn append_dataset(&mut self, name: &str, chunk: &Chunk) -> Result<()> {
        self.check_writable()?;
        self.index.check_append([(name, chunk)])?;
        let offset = self.write_record(&RecordRef::Append {
            datasets: vec![(name, chunk)],
        })?;
        self.index.apply_append(offset, [(name, chunk)])
    }

    /// One record per batch: the batch is either fully on disk or dropped by recovery
    fn append_batch(&mut self, chunks: &[(String, Chunk)]) -> Result<()> {
        self.check_writable()?;
        let datasets: Vec<(&str, &Chunk)> = chunks.iter().map(|(n, c)| (n.as_str(), c)).collect();
        self.index.check_append(datasets.iter().copied())?;
        let offset = self.write_record(&RecordRef::Append {
            datasets: datasets.clone(),
        })?;
        self.index.apply_append(offset, datasets)
    }

    fn get_dataset_length(&self, name: &str) -> Option<u64> {
        self.index.datasets.get(name).map(|d| d.info.len)
    }

    fn dataset_info(&self, name: &str) -> Option<DatasetInfo> {
        self.index.datasets.get(name).map(|d| d.info.clone())
    }

    fn dataset_names(&self) -> Vec<String> {
        self.index.datasets.keys().cloned().collect()
    }

    fn read_dataset(&self, name: &str) -> Result<Chunk> {
        let dataset = self
            .index
            .datasets
            .get(name)
            .ok_or_else(|| RtdcError::UnknownFeature(name.to_string()))?;

        let mut file = File::open(&self.path)?;
        let mut result: Option<Chunk> = None;
        for &offset in &dataset.offsets {
            let datasets = match recovery::read_record_at(&mut file, offset)? {
                Record::Append { datasets } => datasets,
                _ => {
                    return Err(RtdcError::Corruption(format!(
                        "record at offset {} is not an append record",
                        offset
                    )))
                }
            };
            let chunk = datasets
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c)
                .ok_or_else(|| {
                    RtdcError::Corruption(format!(
                        "record at offset {} has no data for {}",
                        offset, name
                    ))
                })?;
            match result.as_mut() {
                Some(acc) => acc.extend(&chunk)?,
                None => result = Some(chunk),
            }
        }

        result.ok_or_else(|| RtdcError::Corruption(format!("dataset {} has no records", name)))
    }

    fn set_attribute(&mut self, section: &str, key: &str, value: &Value) -> Result<()> {
        self.check_writable()?;
        self.write_record(&RecordRef::Attribute { section, key, value })?;
        self.index
            .attributes
            .insert((section.to_string(), key.to_string()), value.clone());
        self.index.sealed = false;
        Ok(())
    }

    fn get_attribute(&self, section: &str, key: &str) -> Option<Value> {
        self.index
            .attributes
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn attributes(&self) -> Vec<(String, String, Value)> {
        self.index
            .attributes
            .iter()
            .map(|((s, k), v)| (s.clone(), k.clone(), v.clone()))
            .collect()
    }

    fn is_sealed(&self) -> bool {
        self.index.sealed
    }

    fn flush(&mut self) -> Result<()> {
        self.sync()
    }

    fn seal(&mut self, read_only: bool) -> Result<()> {
        self.check_writable()?;
        self.write_record(&RecordRef::Seal { read_only })?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.unsynced = 0;
        self.index.sealed = true;

        if read_only {
            let mut permissions = fs::metadata(&self.path)?.permissions();
            permissions.set_readonly(true);
            fs::set_permissions(&self.path, permissions)?;
            self.read_only = true;
        }

        tracing::debug!("Sealed container file {:?} (read_only={})", self.path, read_only);
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        if self.unsynced > 0 {
            self.sync()?;
        }
        Ok(())
    }
}
