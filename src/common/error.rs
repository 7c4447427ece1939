use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("xz decompression failed: {0}")]
    Xz(#[from] lzma::LzmaError),

    #[error("registry error: {message}")]
    Registry { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("time-series write failed: {message}")]
    Write { message: String },

    #[error("Vagrant Cloud API error: {message}")]
    VagrantCloud { message: String },
}

pub type Result<T> = std::result::Result<T, MetricsError>;
