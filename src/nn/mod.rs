pub mod dataset;
pub mod model;
pub mod training;

pub use training::{MlpParams, MlpRegressor};
