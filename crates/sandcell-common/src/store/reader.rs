use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::protocol::error::StoreError;
use crate::store::layout::{Record, RegionView, StoreStats};

/// Device and inode of a region file, used to notice replacement.
type FileIdentity = (u64, u64);

/// Read-only access to a record store owned by another process.
///
/// The mapping is checked before every access. If the region file was
/// replaced or removed, or the writer marked the region closed, the reader
/// maps the current file again. Readers never modify the region.
pub struct ShareReader {
    path: PathBuf,
    map: Option<Mmap>,
    identity: FileIdentity,
    saw_closed: bool,
}

impl ShareReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut reader = Self {
            path: path.as_ref().to_path_buf(),
            map: None,
            identity: (0, 0),
            saw_closed: false,
        };
        reader.reopen()?;
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record stored under `id`, reopening the region first if the
    /// current mapping is stale.
    pub fn get(&mut self, id: &str) -> Result<Option<Record>, StoreError> {
        self.ensure_fresh()?;
        let view = self.view()?;
        view.find(id.as_bytes())
            .map(|index| view.record(index, &self.path))
            .transpose()
    }

    pub fn stats(&mut self) -> Result<StoreStats, StoreError> {
        self.ensure_fresh()?;
        Ok(self.view()?.stats())
    }

    /// Drops the local mapping. The next access maps the region again.
    pub fn close(&mut self) {
        self.map = None;
    }

    pub fn is_closed(&self) -> bool {
        self.map.is_none()
    }

    /// Whether the mapping no longer reflects the file at `path`.
    pub fn is_stale(&self) -> bool {
        let Some(map) = &self.map else {
            return true;
        };
        match std::fs::metadata(&self.path) {
            Ok(meta) if (meta.dev(), meta.ino()) == self.identity => {}
            _ => return true,
        }
        // A region that was already closed when mapped stays readable; only
        // a close that happened after mapping triggers a reopen.
        let closed = RegionView::new(map, &self.path)
            .map(|view| view.is_closed())
            .unwrap_or(true);
        closed && !self.saw_closed
    }

    fn ensure_fresh(&mut self) -> Result<(), StoreError> {
        if self.is_stale() {
            tracing::debug!(path = %self.path.display(), "record store mapping is stale, reopening");
            self.reopen()?;
        }
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), StoreError> {
        self.map = None;
        let file = File::open(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let meta = file.metadata().map_err(|e| StoreError::io(&self.path, e))?;

        // SAFETY: the writer never truncates a mapped region; it replaces the
        // file by rename, so this mapping stays valid for its lifetime.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| StoreError::io(&self.path, e))?;
        let closed = RegionView::new(&map, &self.path)?.is_closed();

        self.identity = (meta.dev(), meta.ino());
        self.saw_closed = closed;
        self.map = Some(map);
        Ok(())
    }

    fn view(&self) -> Result<RegionView<'_>, StoreError> {
        let map = self
            .map
            .as_ref()
            .ok_or_else(|| StoreError::corrupt(&self.path, "region is not mapped"))?;
        RegionView::new(map, &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::RecordKind;
    use crate::store::ShareWriter;

    #[test]
    fn test_reader_sees_writer_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("00abc", RecordKind::Script, b"{\"x\":1}").unwrap();

        let mut reader = ShareReader::open(&path).unwrap();
        let record = reader.get("00abc").unwrap().unwrap();
        assert_eq!(record.kind, RecordKind::Script);
        assert_eq!(record.payload, b"{\"x\":1}");
        assert!(reader.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_records_written_after_open_are_visible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        let mut reader = ShareReader::open(&path).unwrap();

        writer.set("late", RecordKind::Task, b"1").unwrap();
        assert_eq!(reader.get("late").unwrap().unwrap().kind, RecordKind::Task);
    }

    #[test]
    fn test_delete_hides_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("00abc", RecordKind::Task, b"{}").unwrap();
        let mut reader = ShareReader::open(&path).unwrap();
        assert!(reader.get("00abc").unwrap().is_some());

        assert!(writer.delete("00abc", RecordKind::Task).unwrap());
        assert!(reader.get("00abc").unwrap().is_none());
        assert!(!writer.delete("00abc", RecordKind::Task).unwrap());
    }

    #[test]
    fn test_reader_reopens_recreated_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");

        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("old", RecordKind::Script, b"1").unwrap();
        let mut reader = ShareReader::open(&path).unwrap();
        assert!(reader.get("old").unwrap().is_some());
        drop(writer);

        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("new", RecordKind::Script, b"2").unwrap();

        assert!(reader.is_stale());
        assert!(reader.get("old").unwrap().is_none());
        assert_eq!(reader.get("new").unwrap().unwrap().payload, b"2");
        assert!(!reader.is_stale());
    }

    #[test]
    fn test_reader_keeps_serving_closed_region() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("kept", RecordKind::Script, b"1").unwrap();
        drop(writer);

        let mut reader = ShareReader::open(&path).unwrap();
        assert!(!reader.is_stale());
        assert!(reader.get("kept").unwrap().is_some());
    }

    #[test]
    fn test_local_close_reopens_on_next_access() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("00abc", RecordKind::Script, b"1").unwrap();

        let mut reader = ShareReader::open(&path).unwrap();
        reader.close();
        assert!(reader.is_closed());
        assert!(reader.get("00abc").unwrap().is_some());
        assert!(!reader.is_closed());
    }

    #[test]
    fn test_open_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShareReader::open(dir.path().join("absent"));
        assert!(matches!(result, Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_removed_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let writer = ShareWriter::create(&path, 4096, 16).unwrap();
        let mut reader = ShareReader::open(&path).unwrap();

        drop(writer);
        ShareWriter::remove_files(&path);
        assert!(reader.is_stale());
        assert!(reader.get("00abc").is_err());
    }

    #[test]
    fn test_second_writer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let _writer = ShareWriter::create(&path, 4096, 16).unwrap();

        let second = ShareWriter::create(&path, 4096, 16);
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn test_writer_rejects_zero_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let result = ShareWriter::create(dir.path().join("share"), 0, 16);
        assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_writer_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 4096, 16).unwrap();
        writer.set("a", RecordKind::Script, b"12345").unwrap();

        let stats = writer.stats().unwrap();
        assert_eq!(stats.max_entries, 16);
        assert_eq!(stats.live_entries, 1);
        assert_eq!(stats.data_capacity, 4096);
        assert_eq!(stats.data_used, 5);
        assert_eq!(stats.live_bytes, 5);
        assert!(!stats.closed);
    }

    #[test]
    fn test_writer_keeps_accepting_records_around_an_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("share");
        let mut writer = ShareWriter::create(&path, 1024, 16).unwrap();
        writer.set("orphan", RecordKind::Script, b"1").unwrap();

        let payload = vec![b'x'; 100];
        for i in 0..100 {
            let id = format!("r{i}");
            writer.set(&id, RecordKind::Script, &payload).unwrap();
            assert!(writer.delete(&id, RecordKind::Script).unwrap());
        }

        let mut reader = ShareReader::open(&path).unwrap();
        assert_eq!(reader.get("orphan").unwrap().unwrap().payload, b"1");
        let stats = writer.stats().unwrap();
        assert_eq!(stats.live_entries, 1);
        assert_eq!(stats.live_bytes, 1);
    }
}
