// Stream health metrics.
pub mod stats;

pub use stats::{FpsCounter, FrameStats, StatsSnapshot};
