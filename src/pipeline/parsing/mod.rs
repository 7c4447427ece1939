mod access_log;

pub use access_log::{parse_stream, AccessLogParser};
