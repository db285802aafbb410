//! Durable storage for readings and alerts
//!
//! Records are grouped into hour-long [`TimeChunk`]s kept in memory. When the
//! engine is opened on a directory every mutation is appended to a
//! write-ahead log first, and `flush_all` snapshots the chunks to disk and
//! truncates the log. Each snapshot remembers the last log sequence it
//! covers, so recovery skips records a snapshot already holds even when the
//! log was never truncated.

mod chunk;
pub mod export;
mod persistence;

pub use chunk::TimeChunk;
pub use persistence::{PersistenceManager, WalEntry, WalRecord};

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::vitals::{AnomalyEvent, Reading, Severity};

const CHUNK_SECS: i64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Timestamp {timestamp} outside chunk [{start}, {end})")]
    OutsideChunk { timestamp: i64, start: i64, end: i64 },

    #[error("Alert {0} not found")]
    AlertNotFound(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Inclusive time range, either end may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        TimeRange::default()
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        TimeRange {
            start: Some(start),
            end: None,
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TimeRange {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Everything from `hours` ago onwards
    pub fn last_hours(hours: i64) -> Result<Self, StorageError> {
        before_now(Duration::try_hours(hours)).map(TimeRange::since)
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }

    fn validate(&self) -> Result<(), StorageError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(StorageError::InvalidTimeRange(
                "Start time must not be after end time".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// The instant `span` before now. `None` or a span reaching past the
/// representable range is an invalid range rather than an overflow.
pub fn before_now(span: Option<Duration>) -> Result<DateTime<Utc>, StorageError> {
    span.and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| StorageError::InvalidTimeRange("lookback is out of range".to_string()))
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: u64,
    pub acknowledged: bool,
    pub event: AnomalyEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VitalSummary {
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Aggregates over the readings of a time range. Temperatures are in °C.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReadingStatistics {
    pub count: usize,
    pub heart_rate: Option<VitalSummary>,
    pub spo2: Option<VitalSummary>,
    pub temperature: Option<VitalSummary>,
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    fn finish(self) -> Option<VitalSummary> {
        (self.count > 0).then(|| VitalSummary {
            average: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            count: self.count,
        })
    }
}

/// Storage seam used by the monitor, the CLI and the API.
///
/// Queries return newest entries first.
pub trait VitalStore: Send + Sync {
    fn save_reading(&self, reading: &Reading) -> Result<(), StorageError>;

    /// Persist an alert and return its id
    fn save_alert(&self, event: &AnomalyEvent) -> Result<u64, StorageError>;

    fn query_readings(
        &self,
        range: &TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>, StorageError>;

    fn query_alerts(
        &self,
        range: &TimeRange,
        severity: Option<Severity>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredAlert>, StorageError>;

    fn statistics(&self, range: &TimeRange) -> Result<ReadingStatistics, StorageError>;

    fn acknowledge_alert(&self, id: u64) -> Result<(), StorageError>;

    /// Drop everything older than `cutoff`, returning the number of records removed
    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    fn close(&self) -> Result<(), StorageError>;
}

#[derive(Debug)]
pub struct StorageEngine {
    chunks: RwLock<BTreeMap<i64, TimeChunk>>,
    next_alert_id: AtomicU64,
    /// Last log sequence handed out. Held while a record is logged and
    /// applied, and while snapshots are taken.
    wal_seq: Mutex<u64>,
    persistence: Option<PersistenceManager>,
}

impl StorageEngine {
    /// Engine without any backing files
    pub fn in_memory() -> Self {
        StorageEngine {
            chunks: RwLock::new(BTreeMap::new()),
            next_alert_id: AtomicU64::new(1),
            wal_seq: Mutex::new(0),
            persistence: None,
        }
    }

    /// Open (or create) a store under `path`, loading chunk snapshots and
    /// replaying the write-ahead log on top of them
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let persistence = PersistenceManager::new(path.as_ref())?;

        let mut chunks = BTreeMap::new();
        for chunk_id in persistence.list_chunks()? {
            chunks.insert(chunk_id, persistence.load_chunk(chunk_id)?);
        }

        let mut last_seq = chunks.values().map(|chunk| chunk.wal_seq).max().unwrap_or(0);
        let mut replayed = 0;
        for record in persistence.replay_wal()? {
            last_seq = last_seq.max(record.seq);
            if Self::recover(&mut chunks, record)? {
                replayed += 1;
            }
        }

        let max_id = chunks.values().filter_map(TimeChunk::max_alert_id).max().unwrap_or(0);
        tracing::info!(
            path = %path.as_ref().display(),
            chunks = chunks.len(),
            replayed,
            "Storage opened"
        );

        Ok(StorageEngine {
            chunks: RwLock::new(chunks),
            next_alert_id: AtomicU64::new(max_id + 1),
            wal_seq: Mutex::new(last_seq),
            persistence: Some(persistence),
        })
    }

    fn chunk_id(timestamp: DateTime<Utc>) -> i64 {
        let ts = timestamp.timestamp();
        ts - ts.rem_euclid(CHUNK_SECS)
    }

    fn chunk_for(chunks: &mut BTreeMap<i64, TimeChunk>, timestamp: DateTime<Utc>) -> &mut TimeChunk {
        let chunk_id = Self::chunk_id(timestamp);
        chunks
            .entry(chunk_id)
            .or_insert_with(|| TimeChunk::new(chunk_id, chunk_id + CHUNK_SECS))
    }

    fn apply(chunks: &mut BTreeMap<i64, TimeChunk>, entry: WalEntry) -> Result<(), StorageError> {
        match entry {
            WalEntry::Reading(reading) => {
                Self::chunk_for(chunks, reading.timestamp).append_reading(reading)
            }
            WalEntry::Alert(alert) => {
                Self::chunk_for(chunks, alert.event.timestamp).append_alert(alert)
            }
            WalEntry::Acknowledge { id } => {
                let alert = chunks
                    .values_mut()
                    .find_map(|chunk| chunk.alert_mut(id))
                    .ok_or(StorageError::AlertNotFound(id))?;
                alert.acknowledged = true;
                Ok(())
            }
        }
    }

    /// Apply a replayed record unless the snapshot of the chunk it touches
    /// already covers it. Returns whether the record was applied.
    fn recover(chunks: &mut BTreeMap<i64, TimeChunk>, record: WalRecord) -> Result<bool, StorageError> {
        let covered = match &record.entry {
            WalEntry::Reading(reading) => Self::chunk_for(chunks, reading.timestamp).wal_seq,
            WalEntry::Alert(alert) => Self::chunk_for(chunks, alert.event.timestamp).wal_seq,
            WalEntry::Acknowledge { id } => {
                match chunks.values().find(|chunk| chunk.contains_alert(*id)) {
                    Some(chunk) => chunk.wal_seq,
                    None => {
                        // the alert went away with a cleaned up chunk
                        tracing::warn!(id, seq = record.seq, "Skipping acknowledgement of unknown alert");
                        return Ok(false);
                    }
                }
            }
        };
        if record.seq <= covered {
            return Ok(false);
        }
        Self::apply(chunks, record.entry)?;
        Ok(true)
    }

    /// Log `entry` under the next sequence number, then apply it
    fn commit(&self, entry: WalEntry) -> Result<(), StorageError> {
        let mut seq = self.wal_seq.lock();
        let record = WalRecord {
            seq: *seq + 1,
            entry,
        };
        if let Some(persistence) = &self.persistence {
            persistence.append(&record)?;
        }
        *seq = record.seq;

        let mut chunks = self.chunks.write();
        Self::apply(&mut chunks, record.entry)
    }

    fn chunk_bounds(range: &TimeRange) -> (i64, i64) {
        (
            range.start.map_or(i64::MIN, Self::chunk_id),
            range.end.map_or(i64::MAX, Self::chunk_id),
        )
    }

    /// Snapshot every chunk to disk and truncate the write-ahead log
    pub fn flush_all(&self) -> Result<(), StorageError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };

        let seq = self.wal_seq.lock();
        let saved = self.write_snapshots(persistence, *seq)?;
        persistence.truncate_wal()?;
        tracing::debug!(chunks = saved, seq = *seq, "Storage flushed");
        Ok(())
    }

    /// Save every chunk stamped with `seq`. Callers hold `wal_seq` so no
    /// record lands between the stamp and the save.
    fn write_snapshots(&self, persistence: &PersistenceManager, seq: u64) -> Result<usize, StorageError> {
        let snapshots: Vec<TimeChunk> = self
            .chunks
            .read()
            .values()
            .cloned()
            .map(|mut chunk| {
                chunk.wal_seq = seq;
                chunk
            })
            .collect();

        for chunk in &snapshots {
            persistence.save_chunk(chunk)?;
        }
        Ok(snapshots.len())
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }
}

impl VitalStore for StorageEngine {
    fn save_reading(&self, reading: &Reading) -> Result<(), StorageError> {
        self.commit(WalEntry::Reading(reading.clone()))
    }

    fn save_alert(&self, event: &AnomalyEvent) -> Result<u64, StorageError> {
        let id = self.next_alert_id.fetch_add(1, Ordering::SeqCst);
        self.commit(WalEntry::Alert(StoredAlert {
            id,
            acknowledged: false,
            event: event.clone(),
        }))?;
        Ok(id)
    }

    fn query_readings(
        &self,
        range: &TimeRange,
        limit: Option<usize>,
    ) -> Result<Vec<Reading>, StorageError> {
        range.validate()?;
        let (first, last) = Self::chunk_bounds(range);

        let chunks = self.chunks.read();
        let mut results: Vec<Reading> = chunks
            .range(first..=last)
            .flat_map(|(_, chunk)| chunk.readings_in(range))
            .cloned()
            .collect();
        drop(chunks);

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn query_alerts(
        &self,
        range: &TimeRange,
        severity: Option<Severity>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredAlert>, StorageError> {
        range.validate()?;
        let (first, last) = Self::chunk_bounds(range);

        let chunks = self.chunks.read();
        let mut results: Vec<StoredAlert> = chunks
            .range(first..=last)
            .flat_map(|(_, chunk)| chunk.alerts_in(range, severity))
            .cloned()
            .collect();
        drop(chunks);

        results.sort_by(|a, b| {
            b.event
                .timestamp
                .cmp(&a.event.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn statistics(&self, range: &TimeRange) -> Result<ReadingStatistics, StorageError> {
        range.validate()?;
        let (first, last) = Self::chunk_bounds(range);

        let mut count = 0;
        let mut heart_rate = Accumulator::default();
        let mut spo2 = Accumulator::default();
        let mut temperature = Accumulator::default();

        let chunks = self.chunks.read();
        for reading in chunks.range(first..=last).flat_map(|(_, chunk)| chunk.readings_in(range)) {
            count += 1;
            if let Some(bpm) = reading.heart_rate {
                heart_rate.add(bpm as f64);
            }
            if let Some(percent) = reading.spo2 {
                spo2.add(percent as f64);
            }
            if let Some(celsius) = reading.temperature_celsius() {
                temperature.add(celsius);
            }
        }

        Ok(ReadingStatistics {
            count,
            heart_rate: heart_rate.finish(),
            spo2: spo2.finish(),
            temperature: temperature.finish(),
        })
    }

    fn acknowledge_alert(&self, id: u64) -> Result<(), StorageError> {
        if !self.chunks.read().values().any(|chunk| chunk.contains_alert(id)) {
            return Err(StorageError::AlertNotFound(id));
        }
        self.commit(WalEntry::Acknowledge { id })
    }

    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff_secs = cutoff.timestamp();
        let mut removed = 0;
        let mut dropped_chunks = Vec::new();
        {
            let mut chunks = self.chunks.write();
            chunks.retain(|&chunk_id, chunk| {
                if chunk.end_time <= cutoff_secs {
                    removed += chunk.len();
                    dropped_chunks.push(chunk_id);
                    false
                } else {
                    true
                }
            });
            if let Some(chunk) = chunks.get_mut(&Self::chunk_id(cutoff)) {
                removed += chunk.retain_from(cutoff_secs);
            }
        }

        if let Some(persistence) = &self.persistence {
            for chunk_id in &dropped_chunks {
                persistence.remove_chunk(*chunk_id)?;
            }
            // the log may still hold records for dropped chunks
            self.flush_all()?;
        }

        tracing::info!(removed, chunks = dropped_chunks.len(), %cutoff, "Old records removed");
        Ok(removed)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.flush_all()
    }
}
