//! Per-day report cache.
//!
//! One JSON file per (series, day) under the cache root. An existing file
//! marks the day as ingested; an existing but empty file marks a day whose
//! log is known to be unavailable upstream, so it is not fetched again.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::warn;

use crate::common::error::{MetricsError, Result};
use crate::domain::{CacheReport, DayReport};
use crate::registry::source_map::{LogSeries, SERIES_COMBINED, SERIES_IPV4, SERIES_IPV6};

#[derive(Debug, Clone)]
pub struct DayCache {
    root: PathBuf,
}

impl DayCache {
    /// Open the cache, creating the per-series directories on first use.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [SERIES_IPV4, SERIES_IPV6, SERIES_COMBINED] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(DayCache { root })
    }

    /// Default cache location under the user's cache directory.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("access-metrics")
    }

    pub fn file_for(&self, series: LogSeries, date: NaiveDate) -> PathBuf {
        self.root
            .join(series.dir())
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    pub fn contains(&self, series: LogSeries, date: NaiveDate) -> bool {
        self.file_for(series, date).exists()
    }

    /// Load a day report, `None` when the day is missing or known-empty.
    ///
    /// A file that exists but cannot be decoded is removed so the next run
    /// re-ingests it, and the current run aborts.
    pub fn load(&self, series: LogSeries, date: NaiveDate) -> Result<Option<CacheReport>> {
        let path = self.file_for(series, date);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str(&content) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                warn!("failed to load {}: {}", path.display(), e);
                // Trigger it to be re-ingested next run.
                let _ = fs::remove_file(&path);
                Err(MetricsError::Cache {
                    message: format!("unreadable cache file {}: {}", path.display(), e),
                })
            }
        }
    }

    pub fn store(&self, series: LogSeries, date: NaiveDate, report: &DayReport) -> Result<()> {
        let path = self.file_for(series, date);
        let mut json = serde_json::to_string(report)?;
        json.push('\n');
        fs::write(path, json)?;
        Ok(())
    }

    /// Mark a day as attempted with no data available.
    pub fn store_empty(&self, series: LogSeries, date: NaiveDate) -> Result<()> {
        fs::write(self.file_for(series, date), b"")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn store_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let cache = DayCache::open(dir.path()).unwrap();
        let mut report = DayReport::default();
        report.ipv4.total = 42;
        report.bytes = 1000;

        let date = day("2024-01-12");
        cache.store(LogSeries::Combined, date, &report).unwrap();
        assert!(cache.contains(LogSeries::Combined, date));

        match cache.load(LogSeries::Combined, date).unwrap() {
            Some(CacheReport::Combined(loaded)) => assert_eq!(loaded, report),
            other => panic!("unexpected cache contents: {:?}", other),
        }
    }

    #[test]
    fn missing_and_empty_files_load_as_none() {
        let dir = tempdir().unwrap();
        let cache = DayCache::open(dir.path()).unwrap();
        let date = day("2024-01-12");

        assert!(cache.load(LogSeries::Ipv4, date).unwrap().is_none());

        cache.store_empty(LogSeries::Ipv4, date).unwrap();
        assert!(cache.contains(LogSeries::Ipv4, date));
        assert!(cache.load(LogSeries::Ipv4, date).unwrap().is_none());
    }

    #[test]
    fn corrupt_files_are_removed_and_error() {
        let dir = tempdir().unwrap();
        let cache = DayCache::open(dir.path()).unwrap();
        let date = day("2024-01-12");

        let path = cache.file_for(LogSeries::Combined, date);
        fs::write(&path, "{ not json").unwrap();

        assert!(cache.load(LogSeries::Combined, date).is_err());
        assert!(!path.exists(), "corrupt cache file must be removed");
    }
}
