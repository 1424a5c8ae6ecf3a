//! File-backed persistence backends for the sink.
//!
//! Both backends write one JSON-encoded [`Message`] per line. They differ in
//! failure handling: [`AppendLog`] reopens its handle after an error and may
//! leave a partial batch behind, [`TransactionalStore`] truncates back to the
//! pre-batch length so a batch is either fully stored or not at all.

mod append_log;
mod transactional;

pub use append_log::AppendLog;
pub use transactional::TransactionalStore;

use sensor_core::{Message, Persist};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// File name used when the configured location is a directory.
pub const DEFAULT_FILE_NAME: &str = "default_file_repo.jsonl";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown store kind '{0}' (expected append|transactional)")]
    UnknownKind(String),

    #[error("Failed to open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Append,
    Transactional,
}

impl FromStr for StoreKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" | "file" => Ok(Self::Append),
            "transactional" | "tx" => Ok(Self::Transactional),
            _ => Err(StoreError::UnknownKind(s.to_string())),
        }
    }
}

/// Map a user-supplied location to the file that will be written.
///
/// An existing directory, or a path ending in a separator, resolves to
/// [`DEFAULT_FILE_NAME`] inside it. Relative paths are anchored at the
/// current working directory.
pub fn resolve_location(location: &Path) -> PathBuf {
    let absolute = if location.is_absolute() {
        location.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(location))
            .unwrap_or_else(|_| location.to_path_buf())
    };
    let names_dir = location
        .as_os_str()
        .to_string_lossy()
        .ends_with(std::path::MAIN_SEPARATOR);
    if names_dir || absolute.is_dir() {
        absolute.join(DEFAULT_FILE_NAME)
    } else {
        absolute
    }
}

pub fn open_store(kind: StoreKind, location: &Path) -> Result<Box<dyn Persist>, StoreError> {
    let path = resolve_location(location);
    let opened: std::io::Result<Box<dyn Persist>> = match kind {
        StoreKind::Append => AppendLog::open(&path).map(|s| Box::new(s) as Box<dyn Persist>),
        StoreKind::Transactional => {
            TransactionalStore::open(&path).map(|s| Box::new(s) as Box<dyn Persist>)
        }
    };
    opened.map_err(|source| StoreError::Open { path, source })
}

/// Read back every well-formed record. Malformed lines are skipped.
pub fn read_records(path: &Path) -> std::io::Result<Vec<Message>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Message>(trimmed) {
            Ok(message) => records.push(message),
            Err(e) => tracing::warn!(error = %e, "Skipping malformed record"),
        }
    }
    Ok(records)
}
