//! A JSON file-backed implementation of the [`RecordStore`][super::RecordStore] trait.
//!
//! Wraps a [`InMemoryRecordStore`][super::memory::InMemoryRecordStore] instance, persisting
//! a snapshot of every record to a JSON file on disk that can be reloaded across restarts.
use crate::error::Error;
use crate::store::memory::InMemoryRecordStore;
use crate::store::{DomainRecord, RecordStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use trust_dns_server::client::rr::LowerName;

/// The on-disk snapshot of a record set: a JSON array of [`DomainRecord`]s.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        SnapshotFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the records in the snapshot. A missing snapshot file is created empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the snapshot is invalid.
    ///
    /// Returns [`Error::IO`] if the path can't be opened, created or read.
    pub async fn load(&self) -> Result<Vec<DomainRecord>, Error> {
        let contents = match File::open(&self.path).await {
            Ok(mut f) => {
                let mut buf = vec![];
                f.read_to_end(&mut buf).await?;
                buf
            }
            Err(err) => match err.kind() {
                ErrorKind::NotFound => {
                    self.save(&[]).await?;
                    return Ok(Vec::default());
                }
                _ => return Err(Error::IO(err)),
            },
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    /// Write `records` to the snapshot, replacing it atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if a record can't be serialized.
    ///
    /// Returns [`Error::IO`] if the snapshot can't be written.
    pub async fn save(&self, records: &[DomainRecord]) -> Result<(), Error> {
        let data = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("tmp");
        let mut output_file = File::create(&tmp_path).await?;
        output_file.write_all(data.as_bytes()).await?;
        output_file.flush().await?;
        output_file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// A file-backed record store. After each update the JSON snapshot on disk is rewritten with
/// the new data so state survives restarts.
///
/// Wraps a [`InMemoryRecordStore`][super::memory::InMemoryRecordStore], operating the same way
/// except for maintaining state beyond in-memory.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct FileRecordStore {
    records: InMemoryRecordStore,
    snapshot: SnapshotFile,
    save_lock: Mutex<()>,
}

impl FileRecordStore {
    /// Load a [`FileRecordStore`] from the snapshot located at the given path, or return an
    /// Error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJSON`] if the snapshot is invalid.
    ///
    /// Returns [`Error::IO`] if the path can't be opened or read.
    pub async fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let snapshot = SnapshotFile::new(p);
        let records = snapshot.load().await?;
        tracing::debug!(
            "loaded {} records from {}",
            records.len(),
            snapshot.path().display()
        );
        Ok(FileRecordStore {
            records: InMemoryRecordStore::with_records(records),
            snapshot,
            save_lock: Mutex::default(),
        })
    }

    /// Save the state of the store to its snapshot file.
    ///
    /// # Errors
    ///
    /// See [`SnapshotFile::save`].
    pub async fn save(&self) -> Result<(), Error> {
        let _guard = self.save_lock.lock().await;
        let records = self.records.list().await;
        self.snapshot.save(&records).await
    }
}

#[async_trait::async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, domain: &LowerName) -> Option<DomainRecord> {
        self.records.get(domain).await
    }

    async fn set(&self, record: DomainRecord) -> Result<(), Error> {
        self.records.set(record).await?;
        self.save().await
    }

    async fn delete(&self, domain: &LowerName) -> Result<(), Error> {
        self.records.delete(domain).await?;
        self.save().await
    }

    async fn list(&self) -> Vec<DomainRecord> {
        self.records.list().await
    }

    async fn load(&self, records: Vec<DomainRecord>) -> Result<(), Error> {
        self.records.load(records).await?;
        self.save().await
    }
}
