pub mod aggregate_use_case;
pub mod ingest_use_case;
pub mod publish_use_case;
