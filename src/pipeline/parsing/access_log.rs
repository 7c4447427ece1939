//! Parser for the download mirror's access logs.
//!
//! One regex per concern: the line layout (Apache combined format with the
//! mirror's `size:`/`want: give:` trailer and optional client-identity
//! fields), the product encoded in the request path, and the image flavor
//! for ISO/JeOS downloads.

use std::io::BufRead;
use std::net::Ipv4Addr;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{info, warn};

use crate::common::error::Result;
use crate::common::thousands;
use crate::domain::{DayReport, Protocol, VisitorStats};
use crate::observability::metrics;

static LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(\S+) \S+ \S+ \[([^:]+:\d+:\d+:\d+ [^\]]+)\] "(\S+)(?: (\S+) \S+)?" (\S+) (\S+) "[^"]*" "[^"]*" .* (?:size:|want:- give:- \d+ )(\S+) \S+(?: +"?(\S+-\S+-\S+-\S+-[^\s"]+|-)"? "?(dvd|ftp|mini|usb-[^"]*|livecd-[^"]*|appliance-?[^"]*|-)"?)?"#,
    )
    .unwrap()
});

static PRODUCT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)/(?:(tumbleweed)|distribution/(?:leap/)?(\d+\.\d+)|openSUSE(?:_|:/)(?:leap(?:_|:/))?(factory|tumbleweed|\d+\.\d+))",
    )
    .unwrap()
});

static IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:/(?:iso|live)/[^/]+-(DVD|NET|GNOME-Live|KDE-Live|Rescue-CD|Kubic-DVD)-[^/]+\.iso(?:\.torrent)?|/jeos/[^/]+-(JeOS)\.[^/]+\.(?:qcow2|vhdx|vmdk|vmx)$)",
    )
    .unwrap()
});

/// First participating, non-empty capture group.
fn first_group<'t>(caps: &Captures<'t>) -> Option<&'t str> {
    caps.iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str())
        .find(|s| !s.is_empty())
}

/// Accumulates one day of log lines into a [`DayReport`].
#[derive(Debug, Default)]
pub struct AccessLogParser {
    report: DayReport,
}

impl AccessLogParser {
    pub fn new() -> Self {
        AccessLogParser::default()
    }

    pub fn feed_line(&mut self, line: &str) {
        let caps = match LINE.captures(line) {
            Some(caps) => caps,
            None => {
                warn!("failed to parse: {}", line);
                metrics::parser::invalid_line();
                self.report.total_invalid += 1;
                return;
            }
        };

        // Only interested in GET or HEAD requests, others are skipped.
        let method = &caps[3];
        if method != "GET" && method != "HEAD" {
            return;
        }
        // Not interested in errors.
        if caps[5].parse::<u16>().map_or(false, |status| status >= 400) {
            return;
        }

        let client = &caps[1];
        let protocol = if client.parse::<Ipv4Addr>().is_ok() {
            Protocol::V4
        } else {
            Protocol::V6
        };
        let counters = self.report.counters_mut(protocol);
        counters.total += 1;

        // Attempt to determine for which product the request was.
        let path = match caps.get(4) {
            Some(path) => path.as_str(),
            None => return,
        };
        let product = match PRODUCT.captures(path).and_then(|c| first_group(&c)) {
            Some(product) => product.to_lowercase().replace("factory", "tumbleweed"),
            None => return,
        };

        *counters.total_product.entry(product.clone()).or_insert(0) += 1;

        if let Some(uuid) = caps.get(8).map(|m| m.as_str()).filter(|uuid| *uuid != "-") {
            let entry = counters
                .unique_product
                .entry(product.clone())
                .or_default()
                .entry(uuid.to_string())
                .or_insert_with(|| VisitorStats {
                    count: 0,
                    flavor: caps.get(9).map(|m| m.as_str().to_string()),
                    ip: Some(client.to_string()),
                });
            entry.count += 1;
        }

        if let Some(image) = IMAGE.captures(path).and_then(|c| first_group(&c)) {
            *counters
                .total_image_product
                .entry(product)
                .or_default()
                .entry(image.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn finish(self) -> DayReport {
        self.report
    }
}

/// Parse a whole (decompressed) access log.
///
/// Returns `None` for empty input so callers can tell an absent log apart
/// from a quiet one. Lines that are not valid UTF-8 are decoded lossily,
/// matching the byte-oriented behavior of the log producers.
pub fn parse_stream<R: BufRead>(mut reader: R) -> Result<Option<DayReport>> {
    let mut parser = AccessLogParser::new();
    let mut bytes = 0u64;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        bytes += n as u64;
        let line = String::from_utf8_lossy(&buf);
        parser.feed_line(line.trim_end_matches(['\r', '\n']));
    }

    if bytes == 0 {
        return Ok(None);
    }

    let mut report = parser.finish();
    report.bytes = bytes;

    metrics::parser::bytes_processed(bytes);
    metrics::parser::requests_counted(report.total());
    info!("processed {} bytes", thousands(bytes));
    info!(
        "found {} requests across {} products",
        thousands(report.total()),
        thousands(report.product_count() as u64)
    );

    Ok(Some(report))
}
