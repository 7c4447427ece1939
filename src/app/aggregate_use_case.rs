//! `aggregate`: the full pipeline.
//!
//! Fill the day cache from the archives, then load the cached reports
//! oldest-first, stepping three rollups per day: one per protocol family
//! (tagged series, `-` row only) and one over the merged data (per-product
//! rows plus flavor and image breakdowns).

use std::path::PathBuf;

use chrono::{Days, NaiveDate, Utc};
use tracing::info;

use crate::common::error::Result;
use crate::common::thousands;
use crate::domain::{CacheReport, Protocol};
use crate::infra::influx::{announce, InfluxConfig, InfluxWriter};
use crate::pipeline::ingestion::{ingest_missing, DayCache};
use crate::pipeline::processing::{IntervalData, Rollup, RollupKind};
use crate::registry::source_map::{
    has_separate_logs, series_for_protocol, LogSeries, SourceMap,
};

pub struct AggregateOptions {
    pub cache_root: PathBuf,
    pub sources: SourceMap,
    pub influx: InfluxConfig,
    pub jobs: usize,
}

pub async fn run_aggregate(options: AggregateOptions) -> Result<()> {
    // Skip the current day since the logs are incomplete and not compressed yet.
    let begin = Utc::now().date_naive() - Days::new(1);
    let end = options.sources.start_date()?;
    let period: Vec<NaiveDate> = end.iter_days().take_while(|date| *date < begin).collect();

    info!("begin: {}", begin);
    info!("end:   {}", end);
    info!("count: {} days", thousands(period.len() as u64));
    announce(&options.influx);

    let cache = DayCache::open(&options.cache_root)?;

    let mut period_reversed = period.clone();
    period_reversed.reverse();
    let ingested =
        ingest_missing(&cache, &options.sources, &period_reversed, options.jobs).await?;
    info!("ingested {} day(s)", ingested);

    aggregate_all(&cache, &options.sources, &period, &options.influx).await
}

/// One protocol's slice of a cached day.
fn protocol_slice(
    report: &CacheReport,
    protocol: Protocol,
    counted_already: bool,
) -> IntervalData {
    match report {
        CacheReport::Combined(day) => {
            let counters = day.counters(protocol).clone();
            // Shared counters must only be counted once per day.
            if counted_already {
                IntervalData::from_counters(counters, 0, 0)
            } else {
                IntervalData::from_counters(counters, day.total_invalid, day.bytes)
            }
        }
        CacheReport::Legacy(flat) => IntervalData::from_legacy(flat.clone()),
    }
}

async fn aggregate_all(
    cache: &DayCache,
    sources: &SourceMap,
    period: &[NaiveDate],
    influx: &InfluxConfig,
) -> Result<()> {
    let writer = InfluxWriter::new(influx.clone())?;
    let migration = sources.migration_date()?;

    let mut access = Rollup::new(RollupKind::Access, Vec::new());
    let mut per_protocol: Vec<(Protocol, Rollup)> = Protocol::ALL
        .iter()
        .map(|&protocol| {
            (
                protocol,
                Rollup::new(
                    RollupKind::Protocol,
                    vec![("protocol".to_string(), protocol.as_str().to_string())],
                ),
            )
        })
        .collect();

    let mut previous: Option<NaiveDate> = None;

    for &date in period {
        let separate = has_separate_logs(date, migration);
        let mut day_data: Option<IntervalData> = None;

        for (protocol, rollup) in per_protocol.iter_mut() {
            let series = if separate {
                series_for_protocol(*protocol)
            } else {
                LogSeries::Combined
            };
            let report = match cache.load(series, date)? {
                Some(report) => report,
                None => continue,
            };
            if separate {
                info!("[{}] [{}] load cache", date, protocol);
            } else {
                info!("[{}] load cache", date);
            }

            let slice = protocol_slice(&report, *protocol, day_data.is_some());
            let points = rollup.step(date, previous, &slice);
            writer.write(&points).await?;

            match day_data.as_mut() {
                Some(merged) => {
                    merged.merge(&slice);
                    // Both slices describe the same day.
                    merged.days = 1;
                }
                None => day_data = Some(slice),
            }
        }

        let day_data = match day_data {
            Some(data) => data,
            None => {
                info!("[{}] skipping due to lack of data", date);
                continue;
            }
        };

        let points = access.step(date, previous, &day_data);
        writer.write(&points).await?;

        previous = Some(date);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DayReport, LegacyProtocolReport};

    fn combined_report() -> CacheReport {
        let mut report = DayReport {
            total_invalid: 7,
            bytes: 9000,
            ..Default::default()
        };
        report.ipv4.total = 10;
        report.ipv6.total = 4;
        CacheReport::Combined(report)
    }

    #[test]
    fn shared_counters_are_attributed_to_the_first_slice_only() {
        let report = combined_report();

        let first = protocol_slice(&report, Protocol::V4, false);
        assert_eq!(first.total, 10);
        assert_eq!(first.total_invalid, 7);
        assert_eq!(first.bytes, 9000);

        let second = protocol_slice(&report, Protocol::V6, true);
        assert_eq!(second.total, 4);
        assert_eq!(second.total_invalid, 0);
        assert_eq!(second.bytes, 0);

        let mut day = first;
        day.merge(&second);
        day.days = 1;
        assert_eq!(day.total, 14);
        assert_eq!(day.total_invalid, 7, "invalid lines must not double");
        assert_eq!(day.bytes, 9000, "bytes must not double");
    }

    #[test]
    fn legacy_files_keep_their_own_shared_counters() {
        let legacy = CacheReport::Legacy(LegacyProtocolReport {
            total: 5,
            total_product: Default::default(),
            unique_product: Default::default(),
            total_image_product: Default::default(),
            total_invalid: 2,
            bytes: 100,
        });

        // Split-era files are one per protocol; each carries its own
        // invalid/bytes counters, so they always count.
        let slice = protocol_slice(&legacy, Protocol::V6, true);
        assert_eq!(slice.total, 5);
        assert_eq!(slice.total_invalid, 2);
        assert_eq!(slice.bytes, 100);
    }
}
