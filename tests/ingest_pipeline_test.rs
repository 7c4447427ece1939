//! End-to-end checks of the parse → cache → merge pipeline over synthetic
//! access logs.

use std::io::Cursor;

use access_metrics::domain::{CacheReport, DayReport};
use access_metrics::pipeline::ingestion::DayCache;
use access_metrics::pipeline::parsing::parse_stream;
use access_metrics::pipeline::processing::IntervalData;
use access_metrics::registry::source_map::LogSeries;
use chrono::NaiveDate;
use tempfile::tempdir;

fn log_line(ip: &str, path: &str, status: u16, uuid: &str, flavor: &str) -> String {
    format!(
        r#"{ip} - - [12/Jan/2024:06:25:11 +0000] "GET {path} HTTP/1.1" {status} 512 "-" "ZYpp 17.31.7" download.opensuse.org size:512 1024 "{uuid}" "{flavor}""#
    )
}

fn day_one() -> String {
    [
        log_line(
            "203.0.113.7",
            "/tumbleweed/repo/oss/x86_64/vim-9.0.rpm",
            200,
            "11111111-1111-4111-8111-111111111111",
            "dvd",
        ),
        log_line(
            "203.0.113.7",
            "/tumbleweed/repo/oss/x86_64/emacs-29.rpm",
            200,
            "11111111-1111-4111-8111-111111111111",
            "dvd",
        ),
        log_line(
            "2001:db8::1",
            "/distribution/leap/15.5/repo/oss/noarch/foo.rpm",
            200,
            "22222222-2222-4222-8222-222222222222",
            "ftp",
        ),
        "this is not an access log line".to_string(),
    ]
    .join("\n")
        + "\n"
}

fn day_two() -> String {
    [
        log_line(
            "203.0.113.7",
            "/tumbleweed/repo/oss/x86_64/gcc-13.rpm",
            200,
            "11111111-1111-4111-8111-111111111111",
            "dvd",
        ),
        log_line(
            "198.51.100.2",
            "/distribution/leap/15.5/iso/openSUSE-Leap-15.5-DVD-x86_64-Media.iso",
            200,
            "-",
            "-",
        ),
        log_line(
            "203.0.113.9",
            "/tumbleweed/repo/oss/x86_64/missing.rpm",
            404,
            "-",
            "-",
        ),
    ]
    .join("\n")
        + "\n"
}

fn parse(content: &str) -> DayReport {
    parse_stream(Cursor::new(content.to_string()))
        .unwrap()
        .expect("non-empty log must produce a report")
}

/// Flatten one day report the way the aggregator does: both protocol
/// slices merged, shared counters attributed once.
fn flatten(report: &DayReport) -> IntervalData {
    let mut data =
        IntervalData::from_counters(report.ipv4.clone(), report.total_invalid, report.bytes);
    data.merge(&IntervalData::from_counters(report.ipv6.clone(), 0, 0));
    data.days = 1;
    data
}

#[test]
fn summing_days_matches_aggregating_the_raw_lines_directly() {
    let daily_reports = vec![parse(&day_one()), parse(&day_two())];
    let mut summed = flatten(&daily_reports[0]);
    summed.merge(&flatten(&daily_reports[1]));

    let whole_period = parse(&(day_one() + &day_two()));
    let mut direct = flatten(&whole_period);

    // Only the day count may differ between the two routes.
    direct.days = summed.days;
    assert_eq!(summed, direct);
}

#[test]
fn reingesting_a_log_yields_identical_counters() {
    let first = parse(&day_one());
    let second = parse(&day_one());
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn malformed_lines_never_reach_a_product_bucket() {
    let report = parse(&day_one());
    assert_eq!(report.total_invalid, 1);

    let requests: u64 = report.ipv4.total + report.ipv6.total;
    let product_requests: u64 = report
        .ipv4
        .total_product
        .values()
        .chain(report.ipv6.total_product.values())
        .sum();
    assert_eq!(requests, 3);
    assert_eq!(product_requests, 3);
}

#[test]
fn unique_visitors_never_exceed_product_totals() {
    let report = parse(&(day_one() + &day_two()));
    for counters in [&report.ipv4, &report.ipv6] {
        for (product, visitors) in &counters.unique_product {
            assert!(visitors.len() as u64 <= counters.total_product[product]);
        }
    }
}

#[test]
fn day_reports_survive_the_cache_round_trip() {
    let dir = tempdir().unwrap();
    let cache = DayCache::open(dir.path()).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();

    let report = parse(&day_one());
    cache.store(LogSeries::Combined, date, &report).unwrap();

    match cache.load(LogSeries::Combined, date).unwrap() {
        Some(CacheReport::Combined(loaded)) => assert_eq!(loaded, report),
        other => panic!("unexpected cache contents: {:?}", other),
    }

    // Storing the same report again changes nothing on disk.
    let path = cache.file_for(LogSeries::Combined, date);
    let before = std::fs::read(&path).unwrap();
    cache.store(LogSeries::Combined, date, &report).unwrap();
    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);
}
