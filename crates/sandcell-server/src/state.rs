use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sandcell_common::protocol::error::{Result, StoreError};
use sandcell_common::{IdGenerator, Record, RecordKind, ShareReader, ShareWriter, StackPolicy};

use crate::config::ServerConfig;
use crate::runtime::CapabilityRegistry;

/// State shared by every connection of a server.
///
/// The writer store and the per-client reader cache each sit behind their
/// own mutex; both are only held for the duration of a single store access.
pub struct ServerState {
    config: ServerConfig,
    writer: Mutex<ShareWriter>,
    readers: Mutex<HashMap<String, ShareReader>>,
    ids: IdGenerator,
    capabilities: Arc<CapabilityRegistry>,
}

impl ServerState {
    /// Validates `config` and creates the writer store.
    pub fn open(config: ServerConfig, capabilities: CapabilityRegistry) -> Result<Self> {
        config.validate().map_err(StoreError::InvalidConfig)?;
        let writer = ShareWriter::create(
            &config.mmap_path,
            config.store_capacity_bytes(),
            config.max_entries,
        )?;

        Ok(Self {
            config,
            writer: Mutex::new(writer),
            readers: Mutex::new(HashMap::new()),
            ids: IdGenerator::new(),
            capabilities: Arc::new(capabilities),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Arc<CapabilityRegistry> {
        Arc::clone(&self.capabilities)
    }

    pub fn stack_policy(&self) -> StackPolicy {
        self.config.stack_policy
    }

    pub fn next_id(&self) -> String {
        self.ids.next()
    }

    /// Reads record `id` from the store belonging to `client_id`.
    ///
    /// Readers are opened on first use and cached. A reader that fails is
    /// evicted so the next fetch starts from a fresh open.
    pub fn read_record(&self, client_id: &str, id: &str) -> Result<Option<Record>> {
        let mut readers = lock(&self.readers)?;
        if !readers.contains_key(client_id) {
            let path = self.config.reader_path(client_id);
            tracing::debug!(client_id, path = %path.display(), "opening client store");
            readers.insert(client_id.to_string(), ShareReader::open(path)?);
        }

        let Some(reader) = readers.get_mut(client_id) else {
            return Ok(None);
        };
        match reader.get(id) {
            Ok(record) => Ok(record),
            Err(e) => {
                readers.remove(client_id);
                Err(e.into())
            }
        }
    }

    pub fn write_record(&self, id: &str, kind: RecordKind, payload: &[u8]) -> Result<()> {
        lock(&self.writer)?.set(id, kind, payload)?;
        Ok(())
    }

    /// Returns whether a record was removed.
    pub fn delete_record(&self, id: &str, kind: RecordKind) -> Result<bool> {
        Ok(lock(&self.writer)?.delete(id, kind)?)
    }

    /// Reads back a record this server wrote.
    pub fn written_record(&self, id: &str) -> Result<Option<Record>> {
        Ok(lock(&self.writer)?.get(id)?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned)
}
