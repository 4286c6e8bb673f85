//! Data loading
//!
//! Bars come from CSV files with a header row and the columns
//! `time, open, high, low, close[, volume]`. Times are RFC 3339 or
//! `%Y-%m-%d %H:%M:%S` (taken as UTC). Every bar is validated and the
//! series must be strictly increasing in time.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;
use tracing::info;

use crate::Bar;

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        })
        .with_context(|| format!("Failed to parse datetime: {}", value))
}

fn parse_field(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64> {
    record
        .get(index)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Parse bars from any CSV reader
pub fn read_bars<R: std::io::Read>(reader: R) -> Result<Vec<Bar>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut bars: Vec<Bar> = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let line = row_idx + 2;
        let record = result.with_context(|| format!("Failed to read row {}", line))?;

        let time = parse_time(record.get(0).context("Missing time column")?)
            .with_context(|| format!("Row {}", line))?;
        let open = parse_field(&record, 1, "open").with_context(|| format!("Row {}", line))?;
        let high = parse_field(&record, 2, "high").with_context(|| format!("Row {}", line))?;
        let low = parse_field(&record, 3, "low").with_context(|| format!("Row {}", line))?;
        let close = parse_field(&record, 4, "close").with_context(|| format!("Row {}", line))?;
        let volume = match record.get(5) {
            Some(v) if !v.is_empty() => {
                parse_field(&record, 5, "volume").with_context(|| format!("Row {}", line))?
            }
            _ => 0.0,
        };

        let bar = Bar::new(time, open, high, low, close, volume)
            .with_context(|| format!("Invalid bar at row {}", line))?;
        if let Some(prev) = bars.last() {
            if bar.time <= prev.time {
                bail!(
                    "Row {}: time {} is not after previous bar {}",
                    line,
                    bar.time,
                    prev.time
                );
            }
        }
        bars.push(bar);
    }

    Ok(bars)
}

/// Load bars from a CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let bars = read_bars(file).with_context(|| format!("Failed to load {}", path.display()))?;

    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        info!(
            bars = bars.len(),
            start = %first.time,
            end = %last.time,
            "Loaded {}",
            path.display()
        );
    }
    Ok(bars)
}
