//! Data shapes shared across the pipeline stages.
//!
//! A [`DayReport`] is what the parser produces for one day of logs and what
//! the cache persists; the aggregation stage flattens reports into
//! [`IntervalData`] buckets that merge across days.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// One visitor as identified by the UUID the installer embeds in its requests.
///
/// `flavor` and `ip` are absent in cache files written before those fields
/// were recorded; the deserializer also accepts the oldest generation where
/// an entry was a bare request count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisitorStats {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl VisitorStats {
    pub fn new(count: u64) -> Self {
        VisitorStats {
            count,
            flavor: None,
            ip: None,
        }
    }
}

impl<'de> Deserialize<'de> for VisitorStats {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Count(u64),
            Full {
                count: u64,
                #[serde(default)]
                flavor: Option<String>,
                #[serde(default)]
                ip: Option<String>,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Count(count) => Ok(VisitorStats::new(count)),
            Repr::Full { count, flavor, ip } => Ok(VisitorStats { count, flavor, ip }),
        }
    }
}

/// Per-uuid visitor map for one product.
pub type VisitorMap = BTreeMap<String, VisitorStats>;

/// Request counters for one protocol family (IPv4 or IPv6).
///
/// `BTreeMap` keeps the serialized maps in sorted key order, which the
/// downstream consumers of the cache files rely on being stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolCounters {
    pub total: u64,
    pub total_product: BTreeMap<String, u64>,
    pub unique_product: BTreeMap<String, VisitorMap>,
    #[serde(default)]
    pub total_image_product: BTreeMap<String, BTreeMap<String, u64>>,
}

/// The parsed result of one day of access logs, as persisted in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayReport {
    pub total_invalid: u64,
    pub bytes: u64,
    pub ipv4: ProtocolCounters,
    pub ipv6: ProtocolCounters,
    /// SHA-256 of the compressed payload the report was parsed from.
    /// Absent when the input came from stdin rather than a fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl DayReport {
    pub fn counters(&self, protocol: Protocol) -> &ProtocolCounters {
        match protocol {
            Protocol::V4 => &self.ipv4,
            Protocol::V6 => &self.ipv6,
        }
    }

    pub fn counters_mut(&mut self, protocol: Protocol) -> &mut ProtocolCounters {
        match protocol {
            Protocol::V4 => &mut self.ipv4,
            Protocol::V6 => &mut self.ipv6,
        }
    }

    /// Total requests across both protocol families.
    pub fn total(&self) -> u64 {
        self.ipv4.total + self.ipv6.total
    }

    /// Number of distinct products seen across both protocol families.
    pub fn product_count(&self) -> usize {
        self.ipv4.total_product.len() + self.ipv6.total_product.len()
    }
}

/// Cache files written before the IPv4/IPv6 log unification carry the
/// counters of a single protocol at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyProtocolReport {
    pub total: u64,
    pub total_product: BTreeMap<String, u64>,
    pub unique_product: BTreeMap<String, VisitorMap>,
    #[serde(default)]
    pub total_image_product: BTreeMap<String, BTreeMap<String, u64>>,
    pub total_invalid: u64,
    pub bytes: u64,
}

/// Either cache file generation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CacheReport {
    Combined(DayReport),
    Legacy(LegacyProtocolReport),
}

/// The protocol families tracked per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    V4,
    V6,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::V4, Protocol::V6];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::V4 => "ipv4",
            Protocol::V6 => "ipv6",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
