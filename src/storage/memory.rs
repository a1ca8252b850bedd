//! In-memory backend
//!
//! Containers live in a shared map keyed by path. Cloning the backend shares
//! the map, so a container can be inspected after the session that wrote it
//! has released its handle.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RtdcError};
use crate::value::Value;

use super::{Chunk, ContainerHandle, DatasetInfo, StorageBackend};

#[derive(Debug, Default)]
struct MemContainer {
    datasets: BTreeMap<String, (DatasetInfo, Chunk)>,
    attributes: BTreeMap<(String, String), Value>,
    sealed: bool,
    read_only: bool,
    in_use: bool,
}

impl MemContainer {
    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(
                io::Error::new(io::ErrorKind::PermissionDenied, "container is read-only").into(),
            );
        }
        Ok(())
    }

    fn append(&mut self, name: &str, chunk: &Chunk) -> Result<()> {
        match self.datasets.get_mut(name) {
            Some((info, stored)) => {
                info.check_append(name, chunk)?;
                stored.extend(chunk)?;
                info.len += chunk.len();
            }
            None => {
                self.datasets
                    .insert(name.to_string(), (DatasetInfo::from_chunk(chunk), chunk.clone()));
            }
        }
        self.sealed = false;
        Ok(())
    }
}

/// Point-in-time copy of a memory container, for inspection
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub datasets: BTreeMap<String, Chunk>,
    pub attributes: BTreeMap<(String, String), Value>,
    pub sealed: bool,
    pub read_only: bool,
}

impl ContainerSnapshot {
    pub fn dataset_length(&self, name: &str) -> Option<u64> {
        self.datasets.get(name).map(|c| c.len())
    }

    pub fn attribute(&self, section: &str, key: &str) -> Option<&Value> {
        self.attributes.get(&(section.to_string(), key.to_string()))
    }
}

/// Process-local backend
///
/// ## Concurrency:
/// - `containers`: RwLock over the path map
/// - each container: its own RwLock, shared with open handles
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    containers: Arc<RwLock<HashMap<PathBuf, Arc<RwLock<MemContainer>>>>>,
    fault: Arc<Mutex<Option<io::ErrorKind>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next mutating handle call fail with an I/O error of `kind`
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        *self.fault.lock() = Some(kind);
    }

    /// Copy of the container at `path`
    pub fn snapshot(&self, path: &Path) -> Option<ContainerSnapshot> {
        let containers = self.containers.read();
        let container = containers.get(path)?.read();
        Some(ContainerSnapshot {
            datasets: container
                .datasets
                .iter()
                .map(|(name, (_, chunk))| (name.clone(), chunk.clone()))
                .collect(),
            attributes: container.attributes.clone(),
            sealed: container.sealed,
            read_only: container.read_only,
        })
    }

    /// Drop the container at `path`
    pub fn remove(&self, path: &Path) -> bool {
        self.containers.write().remove(path).is_some()
    }

    /// Lift the read-only mark of a sealed container
    pub fn set_writable(&self, path: &Path) -> bool {
        match self.containers.read().get(path) {
            Some(container) => {
                container.write().read_only = false;
                true
            }
            None => false,
        }
    }

    fn handle(&self, path: &Path, container: Arc<RwLock<MemContainer>>) -> MemoryHandle {
        MemoryHandle {
            path: path.to_path_buf(),
            container,
            fault: Arc::clone(&self.fault),
        }
    }
}

impl StorageBackend for MemoryBackend {
    type Handle = MemoryHandle;

    fn exists(&self, path: &Path) -> bool {
        self.containers.read().contains_key(path)
    }

    fn create(&self, path: &Path) -> Result<MemoryHandle> {
        let mut containers = self.containers.write();
        if containers.contains_key(path) {
            return Err(RtdcError::ContainerExists(path.to_path_buf()));
        }
        let container = Arc::new(RwLock::new(MemContainer {
            in_use: true,
            ..MemContainer::default()
        }));
        containers.insert(path.to_path_buf(), Arc::clone(&container));
        Ok(self.handle(path, container))
    }

    fn open(&self, path: &Path) -> Result<MemoryHandle> {
        let container = self
            .containers
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| RtdcError::ContainerNotFound(path.to_path_buf()))?;
        {
            let mut state = container.write();
            if state.in_use {
                return Err(RtdcError::ContainerBusy(path.to_path_buf()));
            }
            state.check_writable()?;
            state.in_use = true;
        }
        Ok(self.handle(path, container))
    }
}

/// Handle to a memory container
///
/// At most one handle per container exists at a time; dropping or closing it
/// lets the container be opened again.
#[derive(Debug)]
pub struct MemoryHandle {
    path: PathBuf,
    container: Arc<RwLock<MemContainer>>,
    fault: Arc<Mutex<Option<io::ErrorKind>>>,
}

impl MemoryHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn take_fault(&self) -> Result<()> {
        match self.fault.lock().take() {
            Some(kind) => Err(io::Error::new(kind, "injected backend failure").into()),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.container.write().in_use = false;
    }
}

impl ContainerHandle for MemoryHandle {
    fn append_dataset(&mut self, name: &str, chunk: &Chunk) -> Result<()> {
        self.take_fault()?;
        let mut container = self.container.write();
        container.check_writable()?;
        container.append(name, chunk)
    }

    /// All-or-nothing: every chunk is checked before any is applied
    fn append_batch(&mut self, chunks: &[(String, Chunk)]) -> Result<()> {
        self.take_fault()?;
        let mut container = self.container.write();
        container.check_writable()?;
        for (name, chunk) in chunks {
            if let Some((info, _)) = container.datasets.get(name) {
                info.check_append(name, chunk)?;
            }
        }
        for (name, chunk) in chunks {
            container.append(name, chunk)?;
        }
        Ok(())
    }

    fn get_dataset_length(&self, name: &str) -> Option<u64> {
        self.container.read().datasets.get(name).map(|(info, _)| info.len)
    }

    fn dataset_info(&self, name: &str) -> Option<DatasetInfo> {
        self.container.read().datasets.get(name).map(|(info, _)| info.clone())
    }

    fn dataset_names(&self) -> Vec<String> {
        self.container.read().datasets.keys().cloned().collect()
    }

    fn read_dataset(&self, name: &str) -> Result<Chunk> {
        self.container
            .read()
            .datasets
            .get(name)
            .map(|(_, chunk)| chunk.clone())
            .ok_or_else(|| RtdcError::UnknownFeature(name.to_string()))
    }

    fn set_attribute(&mut self, section: &str, key: &str, value: &Value) -> Result<()> {
        self.take_fault()?;
        let mut container = self.container.write();
        container.check_writable()?;
        container
            .attributes
            .insert((section.to_string(), key.to_string()), value.clone());
        container.sealed = false;
        Ok(())
    }

    fn get_attribute(&self, section: &str, key: &str) -> Option<Value> {
        self.container
            .read()
            .attributes
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn attributes(&self) -> Vec<(String, String, Value)> {
        self.container
            .read()
            .attributes
            .iter()
            .map(|((s, k), v)| (s.clone(), k.clone(), v.clone()))
            .collect()
    }

    fn is_sealed(&self) -> bool {
        self.container.read().sealed
    }

    fn flush(&mut self) -> Result<()> {
        self.take_fault()
    }

    fn seal(&mut self, read_only: bool) -> Result<()> {
        self.take_fault()?;
        let mut container = self.container.write();
        container.sealed = true;
        container.read_only = read_only;
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
