//! Filling the day-report cache from the log archives.
//!
//! The walk starts at the newest day of the period and moves backwards,
//! fetching every day that is missing from the cache, until it hits a day
//! whose cache files all exist. Everything older was ingested by a previous
//! run, so only the contiguous recent gap is ever downloaded.

pub mod cache;
pub mod fetcher;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::common::error::{MetricsError, Result};
use crate::observability::metrics;
use crate::registry::source_map::{series_on, LogSeries, SourceMap};

pub use cache::DayCache;
pub use fetcher::{parse_compressed, LogFetcher};

/// Fetch and parse every day of `period_desc` (newest first) that is not in
/// the cache yet. Returns the number of days that were ingested.
pub async fn ingest_missing(
    cache: &DayCache,
    sources: &SourceMap,
    period_desc: &[NaiveDate],
    jobs: usize,
) -> Result<usize> {
    let migration = sources.migration_date()?;
    let fetcher = LogFetcher::new()?;
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    let mut found: HashSet<LogSeries> = HashSet::new();
    let mut ingested = 0usize;

    for &date in period_desc {
        let series_today = series_on(date, migration);

        for &series in &series_today {
            if found.contains(&series) {
                continue;
            }
            // Skip date+series when no archive serves it.
            let url = match sources.log_url(series, date) {
                Some(url) => url,
                None => continue,
            };

            if cache.contains(series, date) {
                info!("[{}] [{}] found", date, series);
                metrics::cache::hit();
                found.insert(series);
            } else {
                info!("[{}] [{}] ingest", date, series);
                ingested += 1;
                let fetcher = fetcher.clone();
                let cache = cache.clone();
                let semaphore = Arc::clone(&semaphore);
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    ingest_day(&fetcher, &cache, series, date, &url).await
                });
            }
        }

        // Stop once everything older is known to be cached.
        if series_today.iter().all(|series| found.contains(series)) {
            info!("ingest initialization complete");
            break;
        }
    }

    // Wait for all ingest tasks to complete before aggregating.
    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| MetricsError::Cache {
            message: format!("ingest task panicked: {}", e),
        })??;
    }

    Ok(ingested)
}

async fn ingest_day(
    fetcher: &LogFetcher,
    cache: &DayCache,
    series: LogSeries,
    date: NaiveDate,
    url: &str,
) -> Result<()> {
    match fetcher.fetch(url).await? {
        Some(payload) => {
            let report = tokio::task::spawn_blocking(move || parse_compressed(&payload))
                .await
                .map_err(|e| MetricsError::Cache {
                    message: format!("parse task panicked: {}", e),
                })??;
            match report {
                Some(report) => {
                    cache.store(series, date, &report)?;
                    metrics::ingest::day_completed();
                }
                None => {
                    warn!("[{}] [{}] log was empty", date, series);
                    cache.store_empty(series, date)?;
                }
            }
        }
        None => {
            // The archive will never have it; remember that.
            warn!("[{}] [{}] no log available upstream", date, series);
            cache.store_empty(series, date)?;
        }
    }
    Ok(())
}
