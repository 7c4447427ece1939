//! InfluxDB v2 writer.
//!
//! Points are rendered to Line Protocol here and shipped with a plain HTTP
//! POST to the v2 write API; there is no client-library dependency to drag
//! in for what is a string format plus one endpoint.

use tracing::{debug, info};

use crate::common::error::{MetricsError, Result};
use crate::observability::metrics;

/// One measurement row with second-precision timestamp.
///
/// All fields in this pipeline are counters, so values are integers.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, i64)>,
    pub timestamp: i64,
}

impl Point {
    pub fn new(
        measurement: impl Into<String>,
        tags: Vec<(String, String)>,
        fields: Vec<(String, i64)>,
        timestamp: i64,
    ) -> Self {
        Point {
            measurement: measurement.into(),
            tags,
            fields,
            timestamp,
        }
    }

    /// Render the point as one line of Line Protocol.
    pub fn line(&self) -> String {
        let mut out = escape_measurement(&self.measurement);

        let mut tags: Vec<&(String, String)> = self.tags.iter().collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in tags {
            out.push(',');
            out.push_str(&escape_key(key));
            out.push('=');
            out.push_str(&escape_key(value));
        }

        out.push(' ');
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}i", escape_key(key), value))
            .collect();
        out.push_str(&fields.join(","));

        out.push(' ');
        out.push_str(&self.timestamp.to_string());
        out
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub bucket: String,
    pub org: String,
    pub token: String,
    pub dry_run: bool,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        InfluxConfig {
            url: "http://localhost:8086".to_string(),
            bucket: "osrt_access/autogen".to_string(),
            org: "-".to_string(),
            token: String::new(),
            dry_run: false,
        }
    }
}

pub struct InfluxWriter {
    client: reqwest::Client,
    config: InfluxConfig,
}

impl InfluxWriter {
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        Ok(InfluxWriter { client, config })
    }

    /// Write a batch of points; a non-2xx response aborts the run.
    pub async fn write(&self, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = points
            .iter()
            .map(Point::line)
            .collect::<Vec<_>>()
            .join("\n");

        if self.config.dry_run {
            for line in body.lines() {
                println!("{}", line);
            }
            return Ok(());
        }

        let url = format!("{}/api/v2/write", self.config.url.trim_end_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "s"),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if !self.config.token.is_empty() {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.token),
            );
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            metrics::influx::write_error();
            let body = response.text().await.unwrap_or_default();
            return Err(MetricsError::Write {
                message: format!("influx returned {}: {}", status, body),
            });
        }

        metrics::influx::points_written(points.len() as u64);
        debug!("wrote {} points to {}", points.len(), url);
        Ok(())
    }
}

/// Log the write target once at startup so dry runs are obvious.
pub fn announce(config: &InfluxConfig) {
    if config.dry_run {
        info!("dry run: points go to stdout instead of {}", config.url);
    } else {
        info!("writing to {} bucket {}", config.url, config.bucket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_tags_sorted_and_fields_as_integers() {
        let point = Point::new(
            "access_day",
            vec![
                ("product".to_string(), "15.5".to_string()),
                ("flavor".to_string(), "dvd".to_string()),
            ],
            vec![("total".to_string(), 10), ("unique".to_string(), 2)],
            1_700_000_000,
        );
        assert_eq!(
            point.line(),
            "access_day,flavor=dvd,product=15.5 total=10i,unique=2i 1700000000"
        );
    }

    #[test]
    fn escapes_delimiters_in_tags_and_measurements() {
        let point = Point::new(
            "my measure",
            vec![("key".to_string(), "a value,with=stuff".to_string())],
            vec![("value".to_string(), 1)],
            0,
        );
        assert_eq!(
            point.line(),
            "my\\ measure,key=a\\ value\\,with\\=stuff value=1i 0"
        );
    }

    #[test]
    fn tagless_points_render_without_comma() {
        let point = Point::new("protocol_day", vec![], vec![("total".to_string(), 5)], 60);
        assert_eq!(point.line(), "protocol_day total=5i 60");
    }
}
