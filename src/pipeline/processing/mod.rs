pub mod merge;
pub mod rollup;
pub mod summary;

pub use merge::IntervalData;
pub use rollup::{Interval, Rollup, RollupKind};
