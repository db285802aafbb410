//! CSV export of stored readings

use std::io::Write;

use super::{StorageError, TimeRange, VitalStore};

pub const CSV_HEADER: &str = "Timestamp,Heart Rate (bpm),SpO2 (%),Temperature,Unit";

/// Write every reading in `range` as CSV, oldest first. Returns the number
/// of rows written (header excluded).
pub fn export_csv<W: Write>(
    store: &dyn VitalStore,
    writer: &mut W,
    range: &TimeRange,
) -> Result<usize, StorageError> {
    let mut readings = store.query_readings(range, None)?;
    readings.reverse();

    writeln!(writer, "{}", CSV_HEADER)?;
    for reading in &readings {
        let opt = |v: Option<String>| v.unwrap_or_default();
        writeln!(
            writer,
            "{},{},{},{},{}",
            reading.timestamp.to_rfc3339(),
            opt(reading.heart_rate.map(|v| v.to_string())),
            opt(reading.spo2.map(|v| v.to_string())),
            opt(reading.temperature.map(|v| format!("{:.1}", v))),
            reading.temperature_unit,
        )?;
    }
    writer.flush()?;

    Ok(readings.len())
}
