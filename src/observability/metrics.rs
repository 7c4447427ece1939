//! Metric catalog for the pipeline.
//!
//! Every metric name used anywhere in the crate lives in [`MetricName`], so
//! dashboards and code cannot drift apart on spelling.

use std::fmt;

use tracing::info;

/// All metric names emitted by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Fetch metrics
    FetchSuccess,
    FetchError,
    FetchMissing,
    FetchDuration,
    FetchPayloadBytes,

    // Cache metrics
    CacheHits,
    DaysIngested,

    // Parser metrics
    ParserInvalidLines,
    ParserBytesProcessed,
    ParserRequests,

    // Time-series writer metrics
    InfluxPointsWritten,
    InfluxWriteErrors,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FetchSuccess => "access_fetch_success_total",
            MetricName::FetchError => "access_fetch_error_total",
            MetricName::FetchMissing => "access_fetch_missing_total",
            MetricName::FetchDuration => "access_fetch_duration_seconds",
            MetricName::FetchPayloadBytes => "access_fetch_payload_bytes",
            MetricName::CacheHits => "access_cache_hits_total",
            MetricName::DaysIngested => "access_days_ingested_total",
            MetricName::ParserInvalidLines => "access_parser_invalid_lines_total",
            MetricName::ParserBytesProcessed => "access_parser_bytes_processed_total",
            MetricName::ParserRequests => "access_parser_requests_total",
            MetricName::InfluxPointsWritten => "access_influx_points_written_total",
            MetricName::InfluxWriteErrors => "access_influx_write_errors_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Install the Prometheus recorder; with `ACCESS_METRICS_PROMETHEUS_ADDR`
/// set, metrics are additionally served on that address.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Ok(addr) = std::env::var("ACCESS_METRICS_PROMETHEUS_ADDR") {
        let addr: std::net::SocketAddr = addr.parse()?;
        builder.with_http_listener(addr).install()?;
        info!("metrics exporter listening on {}", addr);
    } else {
        builder.install_recorder()?;
    }
    Ok(())
}

pub mod fetch {
    use super::MetricName;

    /// Record a successful log download
    pub fn success() {
        ::metrics::counter!(MetricName::FetchSuccess.as_str()).increment(1);
    }

    /// Record a failed log download
    pub fn error() {
        ::metrics::counter!(MetricName::FetchError.as_str()).increment(1);
    }

    /// Record a log the archive does not have
    pub fn missing() {
        ::metrics::counter!(MetricName::FetchMissing.as_str()).increment(1);
    }

    pub fn request_duration(secs: f64) {
        ::metrics::histogram!(MetricName::FetchDuration.as_str()).record(secs);
    }

    pub fn payload_bytes(bytes: usize) {
        ::metrics::histogram!(MetricName::FetchPayloadBytes.as_str()).record(bytes as f64);
    }
}

pub mod cache {
    use super::MetricName;

    pub fn hit() {
        ::metrics::counter!(MetricName::CacheHits.as_str()).increment(1);
    }
}

pub mod ingest {
    use super::MetricName;

    pub fn day_completed() {
        ::metrics::counter!(MetricName::DaysIngested.as_str()).increment(1);
    }
}

pub mod parser {
    use super::MetricName;

    pub fn invalid_line() {
        ::metrics::counter!(MetricName::ParserInvalidLines.as_str()).increment(1);
    }

    pub fn bytes_processed(bytes: u64) {
        ::metrics::counter!(MetricName::ParserBytesProcessed.as_str()).increment(bytes);
    }

    pub fn requests_counted(count: u64) {
        ::metrics::counter!(MetricName::ParserRequests.as_str()).increment(count);
    }
}

pub mod influx {
    use super::MetricName;

    pub fn points_written(count: u64) {
        ::metrics::counter!(MetricName::InfluxPointsWritten.as_str()).increment(count);
    }

    pub fn write_error() {
        ::metrics::counter!(MetricName::InfluxWriteErrors.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_prometheus_conventions() {
        let counters = [
            MetricName::FetchSuccess,
            MetricName::CacheHits,
            MetricName::ParserInvalidLines,
            MetricName::InfluxPointsWritten,
        ];
        for name in counters {
            assert!(name.as_str().starts_with("access_"));
            assert!(name.as_str().ends_with("_total"));
        }
        assert!(MetricName::FetchDuration.as_str().ends_with("_seconds"));
    }
}
