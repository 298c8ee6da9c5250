pub mod builder;
pub mod calendar;
pub mod pooled;

pub use builder::{FeatureBuilder, FeatureRow, FeatureTable};
pub use pooled::PooledFeatureTable;
