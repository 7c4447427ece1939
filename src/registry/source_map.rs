//! Registry of access-log sources.
//!
//! The mirror's log layout changed over the years: IPv4 and IPv6 requests
//! were logged to separate vhost files until the unification date, and the
//! hosts serving the archive moved. The registry captures this as a list of
//! eras per log series: each era names the last day it covers and the base
//! URL the logs of that era can be fetched from (`null` when they are gone
//! for good). Resolution picks the era with the smallest boundary on or
//! after the requested day.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::common::error::{MetricsError, Result};
use crate::domain::Protocol;

/// Directory names under the cache root, one per log series.
pub const SERIES_IPV4: &str = "ipv4";
pub const SERIES_IPV6: &str = "ipv6";
pub const SERIES_COMBINED: &str = "ipv4+6";

/// A log series: either one protocol family of the split era, or the
/// combined logs written after unification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogSeries {
    Ipv4,
    Ipv6,
    Combined,
}

impl LogSeries {
    pub fn dir(&self) -> &'static str {
        match self {
            LogSeries::Ipv4 => SERIES_IPV4,
            LogSeries::Ipv6 => SERIES_IPV6,
            LogSeries::Combined => SERIES_COMBINED,
        }
    }
}

impl std::fmt::Display for LogSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEra {
    /// Last day this era covers; `None` leaves the era open-ended.
    pub until: Option<NaiveDate>,
    /// Base URL of the log archive for this era, `None` when unavailable.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Log file name template; `{date}` is replaced with `YYYYMMDD`.
    pub filename: String,
    /// Eras sorted by ascending boundary, open-ended era last.
    pub eras: Vec<SourceEra>,
}

impl SeriesConfig {
    /// Base URL applicable to `date`, or `None` when no archive serves it.
    fn base_url(&self, date: NaiveDate) -> Option<&str> {
        self.eras
            .iter()
            .find(|era| era.until.map_or(true, |until| date <= until))
            .and_then(|era| era.url.as_deref())
    }

    /// Earliest era boundary of this series.
    fn first_boundary(&self) -> Option<NaiveDate> {
        self.eras.first().and_then(|era| era.until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMap {
    pub ipv4: SeriesConfig,
    pub ipv6: SeriesConfig,
    #[serde(rename = "ipv4+6")]
    pub combined: SeriesConfig,
}

impl SourceMap {
    /// Load a source map from a JSON registry file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| MetricsError::Registry {
            message: format!("failed to read registry {}: {}", path.display(), e),
        })?;
        serde_json::from_str(&content).map_err(|e| MetricsError::Registry {
            message: format!("failed to parse registry {}: {}", path.display(), e),
        })
    }

    pub fn series(&self, series: LogSeries) -> &SeriesConfig {
        match series {
            LogSeries::Ipv4 => &self.ipv4,
            LogSeries::Ipv6 => &self.ipv6,
            LogSeries::Combined => &self.combined,
        }
    }

    /// First day of the aggregation period.
    pub fn start_date(&self) -> Result<NaiveDate> {
        self.ipv4
            .first_boundary()
            .ok_or_else(|| MetricsError::Registry {
                message: "ipv4 series has no era boundary to start aggregation from".into(),
            })
    }

    /// Last day on which IPv4 and IPv6 requests were logged separately.
    pub fn migration_date(&self) -> Result<NaiveDate> {
        self.combined
            .first_boundary()
            .ok_or_else(|| MetricsError::Registry {
                message: "combined series has no era boundary marking the log unification".into(),
            })
    }

    /// Full URL of the compressed log for `series` on `date`, or `None`
    /// when that day's log is not available from any archive.
    pub fn log_url(&self, series: LogSeries, date: NaiveDate) -> Option<String> {
        let config = self.series(series);
        let base = config.base_url(date)?;
        let filename = config
            .filename
            .replace("{date}", &date.format("%Y%m%d").to_string());
        Some(format!(
            "{}/{}/{}/{}",
            base,
            date.format("%Y"),
            date.format("%m"),
            filename
        ))
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        let mirror = "https://download.opensuse.org/logs";
        let vhost = "download.opensuse.org";
        let date = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();
        SourceMap {
            ipv4: SeriesConfig {
                filename: format!("{vhost}-{{date}}-access_log.xz"),
                eras: vec![
                    SourceEra {
                        until: date("2023-01-01"),
                        url: None,
                    },
                    SourceEra {
                        until: date("2023-11-13"),
                        url: Some(format!("{mirror}/{vhost}")),
                    },
                ],
            },
            ipv6: SeriesConfig {
                filename: format!("ipv6.{vhost}-{{date}}-access_log.xz"),
                eras: vec![
                    SourceEra {
                        until: date("2012-12-31"),
                        url: None,
                    },
                    SourceEra {
                        until: date("2023-11-13"),
                        url: Some(format!("{mirror}/ipv6.{vhost}")),
                    },
                ],
            },
            combined: SeriesConfig {
                filename: format!("{vhost}-{{date}}-access_log.xz"),
                eras: vec![
                    SourceEra {
                        until: date("2023-11-13"),
                        url: None,
                    },
                    SourceEra {
                        until: None,
                        url: Some(format!("{mirror}/{vhost}")),
                    },
                ],
            },
        }
    }
}

/// Whether `date` predates the log unification.
pub fn has_separate_logs(date: NaiveDate, migration: NaiveDate) -> bool {
    date <= migration
}

/// The log series written on `date`.
pub fn series_on(date: NaiveDate, migration: NaiveDate) -> Vec<LogSeries> {
    if has_separate_logs(date, migration) {
        vec![LogSeries::Ipv4, LogSeries::Ipv6]
    } else {
        vec![LogSeries::Combined]
    }
}

/// Map a [`Protocol`] onto the series its pre-unification logs live in.
pub fn series_for_protocol(protocol: Protocol) -> LogSeries {
    match protocol {
        Protocol::V4 => LogSeries::Ipv4,
        Protocol::V6 => LogSeries::Ipv6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn start_and_migration_dates_come_from_era_boundaries() {
        let map = SourceMap::default();
        assert_eq!(map.start_date().unwrap(), day("2023-01-01"));
        assert_eq!(map.migration_date().unwrap(), day("2023-11-13"));
    }

    #[test]
    fn series_split_flips_at_migration() {
        let map = SourceMap::default();
        let migration = map.migration_date().unwrap();
        assert_eq!(
            series_on(day("2023-11-13"), migration),
            vec![LogSeries::Ipv4, LogSeries::Ipv6]
        );
        assert_eq!(
            series_on(day("2023-11-14"), migration),
            vec![LogSeries::Combined]
        );
    }

    #[test]
    fn url_resolution_respects_eras() {
        let map = SourceMap::default();

        // Before the start of the archive nothing is available.
        assert_eq!(map.log_url(LogSeries::Ipv4, day("2022-12-31")), None);
        assert_eq!(map.log_url(LogSeries::Ipv4, day("2023-01-01")), None);

        // Split era logs come from the per-vhost archives.
        assert_eq!(
            map.log_url(LogSeries::Ipv4, day("2023-06-05")).unwrap(),
            "https://download.opensuse.org/logs/download.opensuse.org/2023/06/download.opensuse.org-20230605-access_log.xz"
        );
        assert_eq!(
            map.log_url(LogSeries::Ipv6, day("2023-06-05")).unwrap(),
            "https://download.opensuse.org/logs/ipv6.download.opensuse.org/2023/06/ipv6.download.opensuse.org-20230605-access_log.xz"
        );

        // Combined logs exist only after unification.
        assert_eq!(map.log_url(LogSeries::Combined, day("2023-11-13")), None);
        assert_eq!(
            map.log_url(LogSeries::Combined, day("2024-02-29")).unwrap(),
            "https://download.opensuse.org/logs/download.opensuse.org/2024/02/download.opensuse.org-20240229-access_log.xz"
        );
    }

    #[test]
    fn registry_file_round_trips() {
        let map = SourceMap::default();
        let json = serde_json::to_string(&map).unwrap();
        let parsed: SourceMap = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.log_url(LogSeries::Combined, day("2024-01-02")),
            map.log_url(LogSeries::Combined, day("2024-01-02"))
        );
    }
}
