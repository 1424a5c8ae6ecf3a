use sensor_core::{Message, Persist, PersistError};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Newline-delimited JSON log opened in append mode.
pub struct AppendLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl AppendLog {
    /// Open (or create) the log. Parent directories are created as needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let writer = open_append(path)?;
        info!(path = %path.display(), "Append log opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            info!(path = %self.path.display(), "Reopening append log");
            self.writer = Some(open_append(&self.path)?);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "append log closed"))
    }

    fn write_batch(&mut self, batch: &[Message]) -> Result<(), PersistError> {
        let writer = self.writer()?;
        for message in batch {
            serde_json::to_writer(&mut *writer, message)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Persist for AppendLog {
    fn name(&self) -> &str {
        "append-log"
    }

    fn persist(&mut self, batch: &[Message]) -> Result<(), PersistError> {
        let result = self.write_batch(batch);
        if let Err(e) = &result {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Append failed; handle will be reopened"
            );
            self.writer = None;
        }
        result
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::with_capacity(8192, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_records;
    use sensor_core::{MessageKind, Reading};
    use tempfile::tempdir;

    fn readout(n: u32) -> Message {
        Message::readout(&Reading {
            device_name: "Thermal Sensor 01".to_string(),
            value: format!("{n}.0000"),
            interval_ms: 1000,
            posix_timestamp: format!("1704067200.{n:06}"),
        })
        .unwrap()
    }

    #[test]
    fn appends_batches_as_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sensors.jsonl");

        let mut log = AppendLog::open(&path).unwrap();
        log.persist(&[readout(1), readout(2)]).unwrap();
        log.persist(&[readout(3)]).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![readout(1), readout(2), readout(3)]);
        assert_eq!(records[0].kind, MessageKind::DeviceReadout);
    }

    #[test]
    fn reopening_preserves_existing_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sensors.jsonl");

        AppendLog::open(&path).unwrap().persist(&[readout(1)]).unwrap();
        AppendLog::open(&path).unwrap().persist(&[readout(2)]).unwrap();

        assert_eq!(read_records(&path).unwrap(), vec![readout(1), readout(2)]);
    }

    #[test]
    fn dropped_handle_is_reopened_on_next_batch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sensors.jsonl");

        let mut log = AppendLog::open(&path).unwrap();
        log.persist(&[readout(1)]).unwrap();
        log.writer = None;
        log.persist(&[readout(2)]).unwrap();

        assert!(log.writer.is_some());
        assert_eq!(read_records(&path).unwrap(), vec![readout(1), readout(2)]);
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        assert!(AppendLog::open(&blocker.join("sensors.jsonl")).is_err());
    }
}
