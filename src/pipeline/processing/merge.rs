//! Merging day reports into interval buckets.
//!
//! Everything here is plain addition over disjoint counters, which is what
//! makes the rollups exact: summing the days of a month gives the same
//! numbers as aggregating the month's raw lines in one pass.

use std::collections::BTreeMap;

use crate::domain::{LegacyProtocolReport, ProtocolCounters, VisitorMap, VisitorStats};

/// Counters accumulated over one or more days, flattened across protocols.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalData {
    pub days: u64,
    pub total: u64,
    pub total_product: BTreeMap<String, u64>,
    pub unique_product: BTreeMap<String, VisitorMap>,
    pub total_image_product: BTreeMap<String, BTreeMap<String, u64>>,
    pub total_invalid: u64,
    pub bytes: u64,
}

impl IntervalData {
    /// One day of data for a single protocol family.
    pub fn from_counters(counters: ProtocolCounters, total_invalid: u64, bytes: u64) -> Self {
        IntervalData {
            days: 1,
            total: counters.total,
            total_product: counters.total_product,
            unique_product: counters.unique_product,
            total_image_product: counters.total_image_product,
            total_invalid,
            bytes,
        }
    }

    pub fn from_legacy(report: LegacyProtocolReport) -> Self {
        IntervalData {
            days: 1,
            total: report.total,
            total_product: report.total_product,
            unique_product: report.unique_product,
            total_image_product: report.total_image_product,
            total_invalid: report.total_invalid,
            bytes: report.bytes,
        }
    }

    pub fn merge(&mut self, other: &IntervalData) {
        self.days += other.days;
        self.total += other.total;
        for (product, total) in &other.total_product {
            *self.total_product.entry(product.clone()).or_insert(0) += total;
        }

        merge_unique_products(&mut self.unique_product, &other.unique_product);
        merge_product_plus_key(&mut self.total_image_product, &other.total_image_product);

        self.total_invalid += other.total_invalid;
        self.bytes += other.bytes;
    }
}

/// Sum per-uuid counts; the most recently seen flavor and address win.
fn merge_unique_products(
    dst: &mut BTreeMap<String, VisitorMap>,
    src: &BTreeMap<String, VisitorMap>,
) {
    for (product, visitors) in src {
        let merged = dst.entry(product.clone()).or_default();
        for (uuid, stats) in visitors {
            let entry = merged
                .entry(uuid.clone())
                .or_insert_with(|| VisitorStats::new(0));
            entry.count += stats.count;
            if stats.flavor.is_some() {
                entry.flavor = stats.flavor.clone();
            }
            if stats.ip.is_some() {
                entry.ip = stats.ip.clone();
            }
        }
    }
}

fn merge_product_plus_key(
    dst: &mut BTreeMap<String, BTreeMap<String, u64>>,
    src: &BTreeMap<String, BTreeMap<String, u64>>,
) {
    for (product, pairs) in src {
        let merged = dst.entry(product.clone()).or_default();
        for (key, value) in pairs {
            *merged.entry(key.clone()).or_insert(0) += value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(product: &str, total: u64, uuid: Option<&str>) -> IntervalData {
        let mut counters = ProtocolCounters {
            total,
            ..Default::default()
        };
        counters.total_product.insert(product.to_string(), total);
        if let Some(uuid) = uuid {
            let mut stats = VisitorStats::new(total);
            stats.flavor = Some("dvd".to_string());
            counters
                .unique_product
                .entry(product.to_string())
                .or_default()
                .insert(uuid.to_string(), stats);
        }
        IntervalData::from_counters(counters, 1, 100)
    }

    #[test]
    fn merge_sums_all_counters() {
        let mut a = data("tumbleweed", 3, Some("u-u-i-d-1"));
        let b = data("tumbleweed", 2, Some("u-u-i-d-2"));
        a.merge(&b);

        assert_eq!(a.days, 2);
        assert_eq!(a.total, 5);
        assert_eq!(a.total_product["tumbleweed"], 5);
        assert_eq!(a.unique_product["tumbleweed"].len(), 2);
        assert_eq!(a.total_invalid, 2);
        assert_eq!(a.bytes, 200);
    }

    #[test]
    fn merge_sums_repeat_visitors() {
        let mut a = data("15.5", 3, Some("u-u-i-d-1"));
        let b = data("15.5", 4, Some("u-u-i-d-1"));
        a.merge(&b);

        let stats = &a.unique_product["15.5"]["u-u-i-d-1"];
        assert_eq!(stats.count, 7);
        assert_eq!(stats.flavor.as_deref(), Some("dvd"));
    }

    #[test]
    fn merge_keeps_disjoint_products() {
        let mut a = data("15.5", 1, None);
        let b = data("tumbleweed", 2, None);
        a.merge(&b);
        assert_eq!(a.total_product["15.5"], 1);
        assert_eq!(a.total_product["tumbleweed"], 2);
    }

    #[test]
    fn merge_sums_image_counts() {
        let mut a = data("15.5", 1, None);
        a.total_image_product
            .entry("15.5".into())
            .or_default()
            .insert("DVD".into(), 2);
        let mut b = data("15.5", 1, None);
        b.total_image_product
            .entry("15.5".into())
            .or_default()
            .insert("DVD".into(), 3);

        a.merge(&b);
        assert_eq!(a.total_image_product["15.5"]["DVD"], 5);
    }

    #[test]
    fn merging_days_is_associative_with_direct_aggregation() {
        // Summing a month day by day must match merging everything at once.
        let days = vec![
            data("tumbleweed", 3, Some("u-u-i-d-1")),
            data("tumbleweed", 2, Some("u-u-i-d-1")),
            data("15.5", 4, Some("u-u-i-d-2")),
        ];

        let mut stepwise = days[0].clone();
        stepwise.merge(&days[1]);
        stepwise.merge(&days[2]);

        let mut pairwise = days[1].clone();
        pairwise.merge(&days[2]);
        let mut front_loaded = days[0].clone();
        front_loaded.merge(&pairwise);

        assert_eq!(stepwise, front_loaded);
    }
}
