//! The interval stepper.
//!
//! Days arrive in chronological order. Each interval accumulates days while
//! the day's interval key is unchanged; the first day of a new key flushes
//! the finished interval as TSDB points, timestamped at the previous day.
//! Merging higher-order intervals out of lower ones would be attractive but
//! falls apart on weeks, so every interval merges days directly.

use chrono::{Datelike, Months, NaiveDate, NaiveTime};
use tracing::info;

use crate::infra::influx::Point;
use crate::pipeline::processing::merge::IntervalData;
use crate::pipeline::processing::summary::{
    summarize, summarize_images, IntervalSummary, SummaryState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Day,
    Week,
    Month,
    FiscalQuarter,
    FiscalYear,
}

impl Interval {
    pub const ALL: [Interval; 5] = [
        Interval::Day,
        Interval::Week,
        Interval::Month,
        Interval::FiscalQuarter,
        Interval::FiscalYear,
    ];

    /// Measurement name suffix.
    pub fn suffix(&self) -> &'static str {
        match self {
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
            Interval::FiscalQuarter => "FQ",
            Interval::FiscalYear => "FY",
        }
    }

    /// The bucketing key of `date` for this interval.
    pub fn key(&self, date: NaiveDate) -> String {
        match self {
            Interval::Day => date.format("%Y-%m-%d").to_string(),
            // Calendar year paired with the ISO week number; the historical
            // series has always been keyed this way, including the wrap
            // where Jan 1 can land in week 52 or 53.
            Interval::Week => format!("{}-{:02}", date.year(), date.iso_week().week()),
            Interval::Month => date.format("%Y-%m").to_string(),
            Interval::FiscalQuarter => {
                let shifted = fiscal_shift(date);
                format!("{}-{}", shifted.year(), (shifted.month() + 2) / 3)
            }
            Interval::FiscalYear => fiscal_shift(date).year().to_string(),
        }
    }
}

/// The fiscal calendar runs two months ahead of the civil one.
fn fiscal_shift(date: NaiveDate) -> NaiveDate {
    date.checked_add_months(Months::new(2)).unwrap_or(date)
}

fn timestamp(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp()
}

/// Which measurement family a rollup writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupKind {
    /// The merged series: per-product rows, flavor and image breakdowns.
    Access,
    /// A per-protocol series: only the `-` row, tagged with the protocol.
    Protocol,
}

impl RollupKind {
    fn prefix(&self) -> &'static str {
        match self {
            RollupKind::Access => "access",
            RollupKind::Protocol => "protocol",
        }
    }
}

struct Slot {
    interval: Interval,
    current: Option<(String, IntervalData)>,
}

/// Stateful rollup over one stream of days.
pub struct Rollup {
    kind: RollupKind,
    tags: Vec<(String, String)>,
    slots: Vec<Slot>,
    state: SummaryState,
}

impl Rollup {
    pub fn new(kind: RollupKind, tags: Vec<(String, String)>) -> Self {
        Rollup {
            kind,
            tags,
            slots: Interval::ALL
                .iter()
                .map(|&interval| Slot {
                    interval,
                    current: None,
                })
                .collect(),
            state: SummaryState::default(),
        }
    }

    /// Feed one day. Returns the points of every interval that finished.
    ///
    /// `previous` is the last day that carried data; a finished interval is
    /// only written when that day belonged to it, which also withholds the
    /// very first (necessarily partial) interval of a run.
    pub fn step(
        &mut self,
        date: NaiveDate,
        previous: Option<NaiveDate>,
        data: &IntervalData,
    ) -> Vec<Point> {
        let mut points = Vec::new();

        for i in 0..self.slots.len() {
            let interval = self.slots[i].interval;
            let key = interval.key(date);

            // Merge the day onto the open interval when the key still matches.
            let merged = match &mut self.slots[i].current {
                Some((current_key, acc)) if *current_key == key => {
                    acc.merge(data);
                    true
                }
                _ => false,
            };
            if merged {
                continue;
            }

            if let Some((finished_key, acc)) = self.slots[i].current.take() {
                let mut summary = summarize(&mut self.state, &acc);
                if self.kind == RollupKind::Protocol {
                    summary.products.clear();
                }

                if let Some(prev) = previous.filter(|prev| interval.key(*prev) != key) {
                    let before = points.len();
                    self.append_summary(&mut points, interval, prev, &summary);
                    if self.kind == RollupKind::Access {
                        self.append_flavors(&mut points, interval, prev, &summary);
                        let images = summarize_images(&mut self.state, &acc.total_image_product);
                        self.append_images(&mut points, interval, prev, &images);
                    }
                    info!(
                        "[{}] [{}] [{}] wrote {} points at {} spanning {} day(s)",
                        self.kind.prefix(),
                        interval.suffix(),
                        finished_key,
                        points.len() - before,
                        prev,
                        acc.days
                    );
                }
            }

            // Start the new interval from the current day.
            self.slots[i].current = Some((key, data.clone()));
        }

        points
    }

    fn product_tags(&self, product: &str) -> Vec<(String, String)> {
        let mut tags = vec![("product".to_string(), product.to_string())];
        tags.extend(self.tags.iter().cloned());
        tags
    }

    fn append_summary(
        &self,
        points: &mut Vec<Point>,
        interval: Interval,
        date: NaiveDate,
        summary: &IntervalSummary,
    ) {
        let measurement = format!("{}_{}", self.kind.prefix(), interval.suffix());
        let ts = timestamp(date);

        points.push(Point::new(
            measurement.clone(),
            self.product_tags("-"),
            vec![
                ("total".to_string(), summary.overall.total as i64),
                ("total_invalid".to_string(), summary.overall.total_invalid as i64),
                ("bytes".to_string(), summary.overall.bytes as i64),
                ("unique".to_string(), summary.overall.unique as i64),
            ],
            ts,
        ));

        for (product, product_summary) in &summary.products {
            points.push(Point::new(
                measurement.clone(),
                self.product_tags(product),
                vec![
                    ("total".to_string(), product_summary.total as i64),
                    ("unique".to_string(), product_summary.unique as i64),
                ],
                ts,
            ));
        }
    }

    fn append_flavors(
        &self,
        points: &mut Vec<Point>,
        interval: Interval,
        date: NaiveDate,
        summary: &IntervalSummary,
    ) {
        let measurement = format!("{}_{}", self.kind.prefix(), interval.suffix());
        let ts = timestamp(date);
        for (product, product_summary) in &summary.products {
            for (flavor, unique_count) in &product_summary.flavors {
                let mut tags = self.product_tags(product);
                tags.push(("flavor".to_string(), flavor.clone()));
                points.push(Point::new(
                    measurement.clone(),
                    tags,
                    vec![("value".to_string(), *unique_count as i64)],
                    ts,
                ));
            }
        }
    }

    fn append_images(
        &self,
        points: &mut Vec<Point>,
        interval: Interval,
        date: NaiveDate,
        images: &std::collections::BTreeMap<String, std::collections::BTreeMap<String, u64>>,
    ) {
        let measurement = format!("image_{}", interval.suffix());
        let ts = timestamp(date);
        for (product, pairs) in images {
            for (key, value) in pairs {
                let mut tags = self.product_tags(product);
                tags.push(("key".to_string(), key.clone()));
                points.push(Point::new(
                    measurement.clone(),
                    tags,
                    vec![("value".to_string(), *value as i64)],
                    ts,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProtocolCounters, VisitorStats};

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn one_day(total: u64, uuid: &str) -> IntervalData {
        let mut counters = ProtocolCounters {
            total,
            ..Default::default()
        };
        counters
            .total_product
            .insert("tumbleweed".to_string(), total);
        counters
            .unique_product
            .entry("tumbleweed".to_string())
            .or_default()
            .insert(uuid.to_string(), VisitorStats::new(total));
        IntervalData::from_counters(counters, 0, total * 10)
    }

    #[test]
    fn interval_keys_follow_the_reporting_calendar() {
        assert_eq!(Interval::Day.key(day("2024-01-05")), "2024-01-05");
        assert_eq!(Interval::Month.key(day("2024-01-05")), "2024-01");
        assert_eq!(Interval::Week.key(day("2024-01-05")), "2024-01");
        // Jan 1 2021 belongs to ISO week 53 of 2020 but keeps the calendar year.
        assert_eq!(Interval::Week.key(day("2021-01-01")), "2021-53");
        // Fiscal intervals run two months ahead.
        assert_eq!(Interval::FiscalQuarter.key(day("2023-09-30")), "2023-4");
        assert_eq!(Interval::FiscalQuarter.key(day("2023-11-15")), "2024-1");
        assert_eq!(Interval::FiscalYear.key(day("2023-10-31")), "2023");
        assert_eq!(Interval::FiscalYear.key(day("2023-11-01")), "2024");
    }

    #[test]
    fn nothing_is_written_while_an_interval_is_open() {
        let mut rollup = Rollup::new(RollupKind::Access, vec![]);
        let points = rollup.step(day("2024-01-30"), None, &one_day(1, "a-b-c-d-1"));
        assert!(points.is_empty());
    }

    #[test]
    fn day_boundary_flushes_the_previous_day() {
        let mut rollup = Rollup::new(RollupKind::Access, vec![]);
        rollup.step(day("2024-01-30"), None, &one_day(1, "a-b-c-d-1"));
        let points = rollup.step(day("2024-01-31"), Some(day("2024-01-30")), &one_day(2, "a-b-c-d-1"));

        let day_points: Vec<&Point> = points
            .iter()
            .filter(|p| p.measurement == "access_day")
            .collect();
        assert_eq!(day_points.len(), 2, "a `-` row and one product row");
        assert_eq!(day_points[0].timestamp, timestamp(day("2024-01-30")));
        assert!(day_points[0]
            .fields
            .contains(&("total".to_string(), 1)));
    }

    #[test]
    fn month_flush_equals_the_sum_of_its_days() {
        let mut rollup = Rollup::new(RollupKind::Access, vec![]);
        rollup.step(day("2024-01-30"), None, &one_day(3, "a-b-c-d-1"));
        rollup.step(day("2024-01-31"), Some(day("2024-01-30")), &one_day(4, "a-b-c-d-2"));
        let points = rollup.step(day("2024-02-01"), Some(day("2024-01-31")), &one_day(5, "a-b-c-d-1"));

        let month: Vec<&Point> = points
            .iter()
            .filter(|p| p.measurement == "access_month")
            .collect();
        assert_eq!(month.len(), 2);
        // The `-` row sums both January days.
        assert!(month[0].fields.contains(&("total".to_string(), 7)));
        assert!(month[0].fields.contains(&("unique".to_string(), 2)));
        assert_eq!(month[0].timestamp, timestamp(day("2024-01-31")));
    }

    #[test]
    fn trailing_partial_interval_is_withheld() {
        let mut rollup = Rollup::new(RollupKind::Access, vec![]);
        rollup.step(day("2024-01-30"), None, &one_day(3, "a-b-c-d-1"));
        let points = rollup.step(day("2024-01-31"), Some(day("2024-01-30")), &one_day(4, "a-b-c-d-1"));

        // January itself is still open: no month, FQ or FY points yet.
        assert!(points.iter().all(|p| p.measurement == "access_day"));
    }

    #[test]
    fn protocol_rollups_write_only_the_overall_row() {
        let mut rollup = Rollup::new(
            RollupKind::Protocol,
            vec![("protocol".to_string(), "ipv4".to_string())],
        );
        rollup.step(day("2024-01-30"), None, &one_day(3, "a-b-c-d-1"));
        let points = rollup.step(day("2024-01-31"), Some(day("2024-01-30")), &one_day(4, "a-b-c-d-1"));

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "protocol_day");
        assert!(points[0]
            .tags
            .contains(&("protocol".to_string(), "ipv4".to_string())));
        assert!(points[0]
            .tags
            .contains(&("product".to_string(), "-".to_string())));
    }

    #[test]
    fn image_downloads_flush_into_their_own_measurement() {
        let mut with_images = one_day(2, "a-b-c-d-1");
        with_images
            .total_image_product
            .entry("tumbleweed".to_string())
            .or_default()
            .insert("DVD".to_string(), 2);

        let mut rollup = Rollup::new(RollupKind::Access, vec![]);
        rollup.step(day("2024-01-30"), None, &with_images);
        let points = rollup.step(day("2024-01-31"), Some(day("2024-01-30")), &one_day(1, "a-b-c-d-1"));

        let image: Vec<&Point> = points
            .iter()
            .filter(|p| p.measurement == "image_day")
            .collect();
        assert_eq!(image.len(), 1);
        assert!(image[0]
            .tags
            .contains(&("key".to_string(), "DVD".to_string())));
        assert!(image[0].fields.contains(&("value".to_string(), 2)));
    }
}
