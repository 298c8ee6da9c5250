pub mod artifact;
pub mod cache;
pub mod models;
pub mod returns;
pub mod symbols;
pub mod yahoo;

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised at the boundary between the pipeline and its input files.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("input file {} not found: {remediation}", .path.display())]
    MissingInput { path: PathBuf, remediation: String },
}

impl DataError {
    pub fn missing(path: impl Into<PathBuf>, remediation: impl Into<String>) -> Self {
        Self::MissingInput {
            path: path.into(),
            remediation: remediation.into(),
        }
    }
}
