//! Durable checkpointing of the alert-state table.
//!
//! The snapshot format is a flat sequential stream of alternating JSON
//! records, `AlertKey` then [`StateRecord`], with no count or index; readers
//! decode pairs until end-of-stream. Every save rewrites the whole file: the
//! new contents go to a temporary file in the same directory which is then
//! atomically renamed over the old snapshot, so a failed save never corrupts
//! the previous one.

use std::{
    collections::BTreeMap,
    fs,
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{models::AlertKey, state::{AlertState, StateRecord}};

/// Errors that can occur in the persistence layer.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A snapshot file operation failed.
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("state encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writes the table as alternating key/state records, in table iteration
/// order, replacing the previous snapshot atomically.
pub fn save_table(
    path: &Path,
    table: &BTreeMap<AlertKey, Arc<AlertState>>,
) -> Result<(), PersistenceError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for (key, state) in table {
            serde_json::to_writer(&mut writer, key)?;
            writer.write_all(b"\n")?;
            serde_json::to_writer(&mut writer, &state.record())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    tmp.persist(path).map_err(|e| PersistenceError::Io(e.error))?;
    Ok(())
}

/// Reads back the alternating record stream.
///
/// A missing file is an I/O error for the caller to treat as "fresh
/// install". A stream that turns corrupt or truncated partway is not fatal:
/// the pairs decoded up to that point are returned and the rest logged away.
pub fn load_records(path: &Path) -> Result<Vec<(AlertKey, StateRecord)>, PersistenceError> {
    let file = fs::File::open(path)?;
    let mut stream =
        serde_json::Deserializer::from_reader(BufReader::new(file)).into_iter::<serde_json::Value>();

    let mut records = Vec::new();
    loop {
        let key: AlertKey = match stream.next() {
            None => break,
            Some(Ok(value)) => match serde_json::from_value(value) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable alert key in snapshot, keeping records read so far");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(error = %e, "snapshot truncated or corrupt, keeping records read so far");
                break;
            }
        };
        let state: StateRecord = match stream.next() {
            None => {
                tracing::warn!(key = %key, "snapshot ends after a key with no state record");
                break;
            }
            Some(Ok(value)) => match serde_json::from_value(value) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "undecodable state record in snapshot");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(key = %key, error = %e, "snapshot truncated mid-record");
                break;
            }
        };
        records.push((key, state));
    }
    Ok(records)
}
