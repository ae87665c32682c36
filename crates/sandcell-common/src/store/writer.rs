use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::protocol::error::StoreError;
use crate::protocol::message::RecordKind;
use crate::store::layout::{Record, RegionMut, RegionView, StoreStats, region_len};

/// Exclusive write access to a record store region.
///
/// Creating a writer builds a brand-new region file and atomically renames
/// it over `path`, so readers still mapping an older region notice the
/// replacement and reopen. Exclusivity is an OS advisory lock on
/// `<path>.lock`, released automatically if the process dies.
pub struct ShareWriter {
    path: PathBuf,
    map: MmapMut,
    _region: File,
    _lock: File,
}

impl ShareWriter {
    /// Creates the region at `path` with `capacity_bytes` of payload space
    /// and room for `max_entries` records.
    pub fn create(
        path: impl AsRef<Path>,
        capacity_bytes: u64,
        max_entries: u32,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if capacity_bytes == 0 {
            return Err(StoreError::InvalidConfig("capacity must be greater than zero".into()));
        }
        if max_entries == 0 {
            return Err(StoreError::InvalidConfig("max entries must be greater than zero".into()));
        }

        let lock_path = sidecar(&path, "lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        match lock.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(StoreError::Locked(path)),
            Err(TryLockError::Error(e)) => return Err(StoreError::io(&lock_path, e)),
        }

        let staging = sidecar(&path, "staging");
        let region = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)
            .map_err(|e| StoreError::io(&staging, e))?;
        region
            .set_len(region_len(max_entries, capacity_bytes))
            .map_err(|e| StoreError::io(&staging, e))?;

        // SAFETY: the file was created by this process and is only ever
        // mutated through this mapping while the writer lock is held.
        let mut map = unsafe { MmapMut::map_mut(&region) }.map_err(|e| StoreError::io(&staging, e))?;
        RegionMut::new(&mut map).format(max_entries, capacity_bytes);
        map.flush().map_err(|e| StoreError::io(&staging, e))?;

        std::fs::rename(&staging, &path).map_err(|e| StoreError::io(&path, e))?;
        tracing::info!(
            path = %path.display(),
            capacity_bytes,
            max_entries,
            "record store created"
        );

        Ok(Self {
            path,
            map,
            _region: region,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores `payload` under `id`. The record becomes visible to readers
    /// only once it is complete.
    pub fn set(&mut self, id: &str, kind: RecordKind, payload: &[u8]) -> Result<(), StoreError> {
        RegionMut::new(&mut self.map).insert(id.as_bytes(), kind, payload)?;
        tracing::trace!(id, %kind, len = payload.len(), "record stored");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let view = RegionView::new(&self.map, &self.path)?;
        view.find(id.as_bytes())
            .map(|index| view.record(index, &self.path))
            .transpose()
    }

    /// Removes the record stored under `id`.
    ///
    /// Returns `false` when there was nothing to remove. A record whose kind
    /// differs from `kind` is still removed: the identifier names a single
    /// entry pair either way.
    pub fn delete(&mut self, id: &str, kind: RecordKind) -> Result<bool, StoreError> {
        match RegionMut::new(&mut self.map).remove(id.as_bytes()) {
            Some(stored) => {
                if stored != kind {
                    tracing::debug!(id, %stored, requested = %kind, "deleted record of a different kind");
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(RegionView::new(&self.map, &self.path)?.stats())
    }

    /// Removes the region and lock files for `path`.
    ///
    /// Used on shutdown; missing files are ignored.
    pub fn remove_files(path: impl AsRef<Path>) {
        let path = path.as_ref();
        for file in [path.to_path_buf(), sidecar(path, "lock"), sidecar(path, "staging")] {
            match std::fs::remove_file(&file) {
                Ok(()) => tracing::debug!(path = %file.display(), "removed store file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %file.display(), "failed to remove store file: {}", e),
            }
        }
    }
}

impl Drop for ShareWriter {
    fn drop(&mut self) {
        RegionMut::new(&mut self.map).set_closed(true);
        if let Err(e) = self.map.flush() {
            tracing::warn!(path = %self.path.display(), "failed to flush record store: {}", e);
        }
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
