pub mod ingestion;
pub mod parsing;
pub mod processing;
