use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::chunk::TimeChunk;
use super::{StorageError, StoredAlert};
use crate::vitals::Reading;

/// One durable mutation of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalEntry {
    Reading(Reading),
    Alert(StoredAlert),
    Acknowledge { id: u64 },
}

/// A log entry stamped with its position in the log. Sequence numbers grow
/// for the lifetime of a store, across truncations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub entry: WalEntry,
}

/// Manages storage and retrieval of chunks from disk
#[derive(Debug)]
pub struct PersistenceManager {
    base_path: PathBuf,
    wal: WriteAheadLog,
}

impl PersistenceManager {
    pub fn new(base_path: impl AsRef<Path>) -> io::Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        let chunks_dir = base_path.join("chunks");
        let wal_dir = base_path.join("wal");
        fs::create_dir_all(&chunks_dir)?;
        fs::create_dir_all(&wal_dir)?;

        let wal = WriteAheadLog::new(wal_dir)?;

        Ok(PersistenceManager { base_path, wal })
    }

    /// Save a chunk to disk
    pub fn save_chunk(&self, chunk: &TimeChunk) -> Result<(), StorageError> {
        let chunk_path = self.get_chunk_path(chunk.start_time);
        let serialized = serde_json::to_vec(chunk)?;

        // Write to a temporary file first, then rename over the old snapshot
        let temp_path = chunk_path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
        fs::rename(&temp_path, &chunk_path)?;

        Ok(())
    }

    /// Load a chunk from disk
    pub fn load_chunk(&self, chunk_id: i64) -> Result<TimeChunk, StorageError> {
        let chunk_path = self.get_chunk_path(chunk_id);
        let buffer = fs::read(&chunk_path)?;
        let chunk: TimeChunk = serde_json::from_slice(&buffer)?;
        Ok(chunk)
    }

    pub fn remove_chunk(&self, chunk_id: i64) -> Result<(), StorageError> {
        match fs::remove_file(self.get_chunk_path(chunk_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List all available chunk IDs on disk
    pub fn list_chunks(&self) -> Result<Vec<i64>, StorageError> {
        let chunks_dir = self.base_path.join("chunks");
        let mut chunk_ids = Vec::new();

        for entry in fs::read_dir(&chunks_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "chunk") {
                if let Some(chunk_id) = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<i64>().ok())
                {
                    chunk_ids.push(chunk_id);
                }
            }
        }

        chunk_ids.sort();
        Ok(chunk_ids)
    }

    pub fn append(&self, record: &WalRecord) -> Result<(), StorageError> {
        self.wal.append(record)
    }

    /// Replay WAL to recover data after a crash
    pub fn replay_wal(&self) -> Result<Vec<WalRecord>, StorageError> {
        self.wal.replay()
    }

    /// Truncate WAL after chunks are safely persisted
    pub fn truncate_wal(&self) -> Result<(), StorageError> {
        self.wal.truncate()
    }

    fn get_chunk_path(&self, chunk_id: i64) -> PathBuf {
        self.base_path.join("chunks").join(format!("{}.chunk", chunk_id))
    }
}

/// Write-ahead log for crash recovery
#[derive(Debug)]
pub struct WriteAheadLog {
    log_path: PathBuf,
    log_file: Mutex<File>,
}

impl WriteAheadLog {
    pub fn new(wal_dir: impl AsRef<Path>) -> io::Result<Self> {
        let log_path = wal_dir.as_ref().join("vitals.wal");
        let log_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;

        Ok(WriteAheadLog {
            log_path,
            log_file: Mutex::new(log_file),
        })
    }

    /// Append a record as a 4-byte big-endian length followed by JSON
    pub fn append(&self, record: &WalRecord) -> Result<(), StorageError> {
        let serialized = serde_json::to_vec(record)?;
        let record_size = serialized.len() as u32;

        let mut log_file = self.log_file.lock();
        log_file.write_all(&record_size.to_be_bytes())?;
        log_file.write_all(&serialized)?;
        log_file.sync_data()?;

        Ok(())
    }

    pub fn replay(&self) -> Result<Vec<WalRecord>, StorageError> {
        let mut log_file = self.log_file.lock();
        log_file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        loop {
            let mut size_buf = [0u8; 4];
            match log_file.read_exact(&mut size_buf) {
                Ok(()) => {
                    let record_size = u32::from_be_bytes(size_buf) as usize;
                    let mut record_data = vec![0u8; record_size];
                    match log_file.read_exact(&mut record_data) {
                        Ok(()) => entries.push(serde_json::from_slice(&record_data)?),
                        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                            // torn final write
                            tracing::warn!(path = %self.log_path.display(), "Discarding truncated WAL record");
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(entries)
    }

    pub fn truncate(&self) -> Result<(), StorageError> {
        let new_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&self.log_path)?;

        // reopen in append mode so later writes land at the end
        drop(new_file);
        let reopened = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.log_path)?;
        *self.log_file.lock() = reopened;

        Ok(())
    }
}
