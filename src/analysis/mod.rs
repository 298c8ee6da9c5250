pub mod evaluation;
pub mod rolling;
