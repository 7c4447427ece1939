pub mod apis;
pub mod common;
pub mod domain;
pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod registry;

// Application-level flows tying the pipeline stages together
pub mod app;
