//! Download and decode one day's compressed access log.

use std::io::BufReader;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::common::error::{MetricsError, Result};
use crate::domain::DayReport;
use crate::observability::metrics;
use crate::pipeline::parsing::parse_stream;

const FETCH_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct LogFetcher {
    client: reqwest::Client,
}

impl LogFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(LogFetcher { client })
    }

    /// Fetch the compressed log at `url`.
    ///
    /// `None` means the archive does not have it (and never will); transient
    /// failures are retried before giving up on the whole run.
    pub async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let payload = resp.bytes().await?.to_vec();
                        metrics::fetch::success();
                        metrics::fetch::request_duration(started.elapsed().as_secs_f64());
                        metrics::fetch::payload_bytes(payload.len());
                        return Ok(Some(payload));
                    }
                    if status.is_client_error() {
                        debug!("{} returned {}", url, status);
                        metrics::fetch::missing();
                        return Ok(None);
                    }
                    metrics::fetch::error();
                    if attempt >= FETCH_ATTEMPTS {
                        return Err(MetricsError::Cache {
                            message: format!("{} returned {} after {} attempts", url, status, attempt),
                        });
                    }
                    warn!("{} returned {}, retrying", url, status);
                }
                Err(e) => {
                    metrics::fetch::error();
                    if attempt >= FETCH_ATTEMPTS {
                        return Err(e.into());
                    }
                    warn!("fetching {} failed ({}), retrying", url, e);
                }
            }
            tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        }
    }
}

/// Decompress and parse a fetched payload, stamping it with the checksum of
/// the compressed bytes.
///
/// `None` when the decompressed log is empty.
pub fn parse_compressed(payload: &[u8]) -> Result<Option<DayReport>> {
    let sha_hex = {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        hex::encode(hasher.finalize())
    };

    let decoder = lzma::LzmaReader::new_decompressor(payload)?;
    let report = parse_stream(BufReader::new(decoder))?;
    Ok(report.map(|mut report| {
        report.sha256 = Some(sha_hex);
        report
    }))
}
