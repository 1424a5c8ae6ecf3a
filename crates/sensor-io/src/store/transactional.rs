use sensor_core::{Message, Persist, PersistError};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// All-or-nothing batch store.
///
/// A batch is encoded up front, written at the current end of file and
/// synced. If any step fails the file is truncated back to its pre-batch
/// length, so earlier batches are never touched.
pub struct TransactionalStore {
    path: PathBuf,
    file: File,
    max_bytes: Option<u64>,
}

impl TransactionalStore {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        info!(path = %path.display(), "Transactional store opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            max_bytes: None,
        })
    }

    /// Reject batches that would grow the file past `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn commit(&mut self, start: u64, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(start))?;
        self.file.write_all(bytes)?;
        self.file.sync_data()
    }

    fn rollback(&mut self, start: u64) {
        let restored = self
            .file
            .set_len(start)
            .and_then(|_| self.file.seek(SeekFrom::Start(start)).map(|_| ()));
        if let Err(e) = restored {
            warn!(path = %self.path.display(), error = %e, "Rollback failed");
        } else {
            warn!(path = %self.path.display(), len = start, "Last batch rolled back");
        }
    }
}

impl Persist for TransactionalStore {
    fn name(&self) -> &str {
        "transactional"
    }

    fn persist(&mut self, batch: &[Message]) -> Result<(), PersistError> {
        let mut bytes = Vec::new();
        for message in batch {
            serde_json::to_writer(&mut bytes, message)?;
            bytes.push(b'\n');
        }

        let start = self.file.metadata()?.len();
        if let Some(max) = self.max_bytes {
            if start + bytes.len() as u64 > max {
                return Err(PersistError::RolledBack {
                    len: batch.len(),
                    reason: format!("store limit of {max} bytes reached"),
                });
            }
        }

        if let Err(e) = self.commit(start, &bytes) {
            self.rollback(start);
            return Err(PersistError::RolledBack {
                len: batch.len(),
                reason: e.to_string(),
            });
        }
        debug!(path = %self.path.display(), batch_len = batch.len(), "Batch committed");
        Ok(())
    }
}
