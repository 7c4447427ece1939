//! `ingest`: parse one decompressed access log into a day report.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

use crate::common::error::Result;
use crate::pipeline::parsing::parse_stream;

/// Parse `file` (stdin when `None`) and print the JSON day report on
/// stdout. Empty input prints nothing, so shell pipelines can tell an
/// absent log from a quiet day.
pub fn run_ingest(file: Option<&Path>) -> Result<()> {
    let report = match file {
        Some(path) => parse_stream(BufReader::new(File::open(path)?))?,
        None => parse_stream(io::stdin().lock())?,
    };

    if let Some(report) = report {
        let mut json = serde_json::to_string(&report)?;
        json.push('\n');
        io::stdout().write_all(json.as_bytes())?;
    }
    Ok(())
}
