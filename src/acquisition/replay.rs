//! File-backed source that replays recorded vitals, one JSON object per line.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{check_plausible, AcquisitionMode, VitalSource};
use crate::error::AcquisitionError;
use crate::vitals::{Reading, TemperatureUnit};

/// One recorded sample. Replayed readings are stamped with the time they
/// are read, not the time they were recorded.
#[derive(Debug, Deserialize)]
struct RecordedSample {
    heart_rate: Option<i64>,
    spo2: Option<i64>,
    temperature: Option<f64>,
    #[serde(default)]
    temperature_unit: TemperatureUnit,
}

#[derive(Debug)]
pub struct ReplaySource {
    path: PathBuf,
    lines: Vec<String>,
    position: usize,
    loop_playback: bool,
}

impl ReplaySource {
    pub fn open(path: impl AsRef<Path>, loop_playback: bool) -> Result<Self, AcquisitionError> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path)?;
        Ok(Self::from_lines(path, &content, loop_playback))
    }

    fn from_lines(path: PathBuf, content: &str, loop_playback: bool) -> Self {
        let lines = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        ReplaySource {
            path,
            lines,
            position: 0,
            loop_playback,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remaining(&self) -> usize {
        self.lines.len().saturating_sub(self.position)
    }

    fn next_line(&mut self) -> Option<&str> {
        if self.position >= self.lines.len() {
            if !self.loop_playback || self.lines.is_empty() {
                return None;
            }
            self.position = 0;
        }
        let line = self.lines.get(self.position)?;
        self.position += 1;
        Some(line.as_str())
    }
}

#[async_trait]
impl VitalSource for ReplaySource {
    async fn read(&mut self) -> Result<Reading, AcquisitionError> {
        let line = self.next_line().ok_or(AcquisitionError::Exhausted)?;
        let sample: RecordedSample =
            serde_json::from_str(line).map_err(|e| AcquisitionError::Malformed(e.to_string()))?;

        let reading = Reading {
            heart_rate: sample.heart_rate,
            spo2: sample.spo2,
            temperature: sample.temperature,
            temperature_unit: sample.temperature_unit,
            timestamp: Utc::now(),
        };
        check_plausible(&reading)?;
        Ok(reading)
    }

    fn mode(&self) -> AcquisitionMode {
        AcquisitionMode::Replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const RECORDING: &str = r#"
{"heart_rate": 72, "spo2": 98, "temperature": 36.7}
{"heart_rate": 45}

not json
{"temperature": 99.5, "temperature_unit": "F"}
{}
"#;

    #[tokio::test]
    async fn test_replays_in_order_then_exhausts() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(RECORDING.as_bytes()).unwrap();

        let mut source = ReplaySource::open(file.path(), false).unwrap();
        assert_eq!(source.remaining(), 5);

        let first = source.read().await.unwrap();
        assert_eq!(first.heart_rate, Some(72));
        assert_eq!(first.temperature_unit, TemperatureUnit::C);

        let second = source.read().await.unwrap();
        assert_eq!(second.heart_rate, Some(45));
        assert_eq!(second.spo2, None);

        assert!(matches!(source.read().await, Err(AcquisitionError::Malformed(_))));

        let fourth = source.read().await.unwrap();
        assert_eq!(fourth.temperature_unit, TemperatureUnit::F);

        assert!(matches!(source.read().await, Err(AcquisitionError::EmptyReading)));
        assert!(matches!(source.read().await, Err(AcquisitionError::Exhausted)));
    }

    #[tokio::test]
    async fn test_loop_playback_wraps_around() {
        let mut source = ReplaySource::from_lines(
            PathBuf::from("memory"),
            "{\"heart_rate\": 60}\n{\"heart_rate\": 61}\n",
            true,
        );
        let values: Vec<i64> = {
            let mut out = Vec::new();
            for _ in 0..5 {
                out.push(source.read().await.unwrap().heart_rate.unwrap());
            }
            out
        };
        assert_eq!(values, vec![60, 61, 60, 61, 60]);
    }

    #[tokio::test]
    async fn test_empty_recording_with_loop_is_exhausted() {
        let mut source = ReplaySource::from_lines(PathBuf::from("memory"), "\n\n", true);
        assert!(matches!(source.read().await, Err(AcquisitionError::Exhausted)));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ReplaySource::open("/no/such/recording.jsonl", false),
            Err(AcquisitionError::Io(_))
        ));
    }
}
