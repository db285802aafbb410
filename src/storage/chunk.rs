use serde::{Deserialize, Serialize};

use super::{StorageError, StoredAlert, TimeRange};
use crate::vitals::{Reading, Severity};

/// All readings and alerts whose timestamps fall in `[start_time, end_time)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeChunk {
    pub start_time: i64,
    pub end_time: i64,
    /// Highest log sequence already reflected in this snapshot
    #[serde(default)]
    pub wal_seq: u64,
    readings: Vec<Reading>,
    alerts: Vec<StoredAlert>,
}

impl TimeChunk {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        TimeChunk {
            start_time,
            end_time,
            wal_seq: 0,
            readings: Vec::new(),
            alerts: Vec::new(),
        }
    }

    fn check_bounds(&self, timestamp: i64) -> Result<(), StorageError> {
        if timestamp < self.start_time || timestamp >= self.end_time {
            return Err(StorageError::OutsideChunk {
                timestamp,
                start: self.start_time,
                end: self.end_time,
            });
        }
        Ok(())
    }

    pub fn append_reading(&mut self, reading: Reading) -> Result<(), StorageError> {
        self.check_bounds(reading.timestamp.timestamp())?;
        self.readings.push(reading);
        Ok(())
    }

    pub fn append_alert(&mut self, alert: StoredAlert) -> Result<(), StorageError> {
        self.check_bounds(alert.event.timestamp.timestamp())?;
        self.alerts.push(alert);
        Ok(())
    }

    pub fn readings_in<'a>(&'a self, range: &'a TimeRange) -> impl Iterator<Item = &'a Reading> + 'a {
        self.readings
            .iter()
            .filter(move |r| range.contains(r.timestamp))
    }

    pub fn alerts_in<'a>(
        &'a self,
        range: &'a TimeRange,
        severity: Option<Severity>,
    ) -> impl Iterator<Item = &'a StoredAlert> + 'a {
        self.alerts.iter().filter(move |a| {
            range.contains(a.event.timestamp) && severity.map_or(true, |s| a.event.severity == s)
        })
    }

    pub fn alert_mut(&mut self, id: u64) -> Option<&mut StoredAlert> {
        self.alerts.iter_mut().find(|a| a.id == id)
    }

    pub fn max_alert_id(&self) -> Option<u64> {
        self.alerts.iter().map(|a| a.id).max()
    }

    pub fn contains_alert(&self, id: u64) -> bool {
        self.alerts.iter().any(|a| a.id == id)
    }

    /// Drop entries strictly older than `cutoff` (unix seconds), returning
    /// how many were removed
    pub fn retain_from(&mut self, cutoff: i64) -> usize {
        let before = self.len();
        self.readings.retain(|r| r.timestamp.timestamp() >= cutoff);
        self.alerts.retain(|a| a.event.timestamp.timestamp() >= cutoff);
        before - self.len()
    }

    pub fn len(&self) -> usize {
        self.readings.len() + self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
