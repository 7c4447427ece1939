//! Turning an interval bucket into the rows written to the TSDB.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::pipeline::processing::merge::IntervalData;

/// Product versions worth reporting on; request paths name plenty of other
/// repositories that would only add noise to the graphs.
static PRODUCT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(10\.[2-3]|11\.[0-4]|12\.[1-3]|13\.[1-2]|42\.[1-3]|15\.[0-6]|tumbleweed|slowroll)$")
        .unwrap()
});

pub fn product_filter(product: &str) -> bool {
    PRODUCT_PATTERN.is_match(product)
}

/// Products and image keys seen in earlier summaries. Lapsed entries are
/// written as zeros so the graphs drop to zero instead of gapping.
#[derive(Debug, Default)]
pub struct SummaryState {
    seen_products: BTreeSet<String>,
    seen_image_keys: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallSummary {
    pub total: u64,
    pub total_invalid: u64,
    pub bytes: u64,
    pub unique: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductSummary {
    pub total: u64,
    pub unique: u64,
    /// Unique visitors per install medium, when the data carries flavors.
    pub flavors: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalSummary {
    pub overall: OverallSummary,
    pub products: BTreeMap<String, ProductSummary>,
}

/// Summarize one finished interval.
///
/// A UUID should be unique to a product, so summing per-product unique
/// counts gives an accurate total across all products.
pub fn summarize(state: &mut SummaryState, data: &IntervalData) -> IntervalSummary {
    let mut overall = OverallSummary {
        total: data.total,
        total_invalid: data.total_invalid,
        bytes: data.bytes,
        unique: 0,
    };
    let mut products: BTreeMap<String, ProductSummary> = BTreeMap::new();

    for (product, total) in &data.total_product {
        if !product_filter(product) {
            continue;
        }
        let mut summary = ProductSummary {
            total: *total,
            ..Default::default()
        };
        if let Some(visitors) = data.unique_product.get(product) {
            summary.unique = visitors.len() as u64;
            overall.unique += summary.unique;
            if visitors.values().next().map_or(false, |v| v.flavor.is_some()) {
                for stats in visitors.values() {
                    if let Some(flavor) = &stats.flavor {
                        *summary.flavors.entry(flavor.clone()).or_insert(0) += 1;
                    }
                }
            }
        }
        products.insert(product.clone(), summary);
        state.seen_products.insert(product.clone());
    }

    for product in &state.seen_products {
        products.entry(product.clone()).or_default();
    }

    IntervalSummary { overall, products }
}

/// Summarize image downloads per (product, image key), zero-filling keys
/// that were reported before but carry no data this interval.
pub fn summarize_images(
    state: &mut SummaryState,
    data: &BTreeMap<String, BTreeMap<String, u64>>,
) -> BTreeMap<String, BTreeMap<String, u64>> {
    let mut summary: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();

    let products: BTreeSet<String> = state
        .seen_image_keys
        .keys()
        .chain(data.keys())
        .cloned()
        .collect();

    for product in products {
        if !product_filter(&product) {
            continue;
        }
        let seen = state.seen_image_keys.entry(product.clone()).or_default();
        let current = data.get(&product);

        let mut keys: BTreeSet<String> = seen.iter().cloned().collect();
        if let Some(current) = current {
            keys.extend(current.keys().cloned());
        }

        let rows = summary.entry(product).or_default();
        for key in keys {
            seen.insert(key.clone());
            let value = current.and_then(|m| m.get(&key)).copied().unwrap_or(0);
            rows.insert(key, value);
        }
    }

    summary
}
