//! CSV signal-feed adapter.
//!
//! The alert feed drops day-stamped CSV files
//! (`<prefix>.<strategy>.<YYYYMMDD>.csv`) into a directory, appending rows
//! through the session. This adapter tails the current day's file and
//! returns rows it has not yet seen, in file order. Delivery is
//! at-least-once by design: after a restart the whole file is re-read and
//! the engine's deduplication sorts it out.
//!
//! Expected columns: time, symbol, type, description, price, relative
//! volume.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

use alert_trade_core::{Signal, SignalFeedConfig, SignalSource};

pub struct CsvSignalSource {
    config: SignalFeedConfig,
    current_file: Option<PathBuf>,
    rows_seen: usize,
}

impl CsvSignalSource {
    #[must_use]
    pub fn new(config: SignalFeedConfig) -> Self {
        Self {
            config,
            current_file: None,
            rows_seen: 0,
        }
    }

    fn todays_file(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d");
        self.config.directory.join(format!(
            "{}.{}.{}.csv",
            self.config.file_prefix, self.config.strategy_name, stamp
        ))
    }

    fn parse_row(record: &csv::StringRecord) -> Result<Signal> {
        anyhow::ensure!(record.len() >= 5, "row has {} columns, expected >= 5", record.len());

        Ok(Signal {
            timestamp: parse_timestamp(&record[0])?,
            symbol: record[1].trim().to_uppercase(),
            kind: record[2].trim().to_string(),
            description: record[3].trim().to_string(),
            price: Decimal::from_str(record[4].trim())
                .with_context(|| format!("bad price: {}", &record[4]))?,
            relative_volume: record
                .get(5)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0.0),
        })
    }
}

/// Accepts either a full RFC 3339 timestamp or a bare `HH:MM:SS` clock
/// time (interpreted as today, UTC); the feed has shipped both formats.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .with_context(|| format!("bad timestamp: {raw}"))?;
    Ok(Utc::now()
        .date_naive()
        .and_time(time)
        .and_utc())
}

#[async_trait]
impl SignalSource for CsvSignalSource {
    async fn next_batch(&mut self) -> Result<Vec<Signal>> {
        let path = self.todays_file();

        if self.current_file.as_ref() != Some(&path) {
            info!(file = %path.display(), "Switching to new alert file");
            self.current_file = Some(path.clone());
            self.rows_seen = 0;
        }

        if !path.exists() {
            debug!(file = %path.display(), "Alert file not present yet");
            return Ok(vec![]);
        }

        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("opening {}", path.display()))?;

        let mut batch = Vec::new();
        for (index, result) in reader.records().enumerate() {
            if index < self.rows_seen {
                continue;
            }
            let record = result.context("reading alert row")?;
            match Self::parse_row(&record) {
                Ok(signal) => batch.push(signal),
                Err(e) => warn!(row = index + 1, error = %e, "Skipping malformed alert row"),
            }
            self.rows_seen = index + 1;
        }

        if !batch.is_empty() {
            info!(count = batch.len(), "New alerts from feed");
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn source_in(dir: &tempfile::TempDir) -> CsvSignalSource {
        CsvSignalSource::new(SignalFeedConfig {
            directory: dir.path().to_path_buf(),
            strategy_name: "Breaking out on Volume".to_string(),
            file_prefix: "alertlogging".to_string(),
            poll_secs: 1,
        })
    }

    fn todays_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join(format!(
            "alertlogging.Breaking out on Volume.{}.csv",
            Utc::now().format("%Y%m%d")
        ))
    }

    fn write_file(path: &PathBuf, rows: &[&str]) {
        let mut file = std::fs::File::create(path).unwrap();
        writeln!(file, "Time,Symbol,Type,Description,Price,RelVol").unwrap();
        for row in rows {
            writeln!(file, "{row}").unwrap();
        }
    }

    #[tokio::test]
    async fn missing_file_yields_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = source_in(&dir);
        assert!(source.next_batch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_new_rows_are_returned_on_subsequent_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = todays_path(&dir);
        let mut source = source_in(&dir);

        write_file(&path, &["14:31:00,ACME,New High,New High,10.00,5.0"]);
        let batch = source.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].symbol, "ACME");
        assert_eq!(batch[0].price, dec!(10.00));

        // No new rows: empty batch.
        assert!(source.next_batch().await.unwrap().is_empty());

        // Feed appends one row; only that row comes back.
        write_file(
            &path,
            &[
                "14:31:00,ACME,New High,New High,10.00,5.0",
                "14:32:10,BETA,New High,Breaking out on Volume,22.50,7.1",
            ],
        );
        let batch = source.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].symbol, "BETA");
        assert_eq!(batch[0].relative_volume, 7.1);
    }

    #[tokio::test]
    async fn malformed_rows_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = todays_path(&dir);
        let mut source = source_in(&dir);

        write_file(
            &path,
            &[
                "not-a-time,ACME,New High,New High,not-a-price,x",
                "14:31:00,BETA,New High,New High,22.50,7.1",
            ],
        );

        let batch = source.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].symbol, "BETA");
    }

    #[test]
    fn timestamp_accepts_both_formats() {
        assert!(parse_timestamp("2025-08-04T14:31:00Z").is_ok());
        assert!(parse_timestamp("14:31:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
