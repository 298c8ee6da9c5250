pub mod chart_utils;
pub mod dashboard;
