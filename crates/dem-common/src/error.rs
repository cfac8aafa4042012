//! Error types shared by the DEM crates.

use thiserror::Error;

use crate::bbox::BboxParseError;
use crate::crs::CrsParseError;

/// Result type alias using CommonError.
pub type CommonResult<T> = Result<T, CommonError>;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Invalid bbox: {0}")]
    InvalidBbox(#[from] BboxParseError),

    #[error("Invalid CRS: {0}")]
    InvalidCrs(#[from] CrsParseError),

    #[error("Unknown DEM source '{id}' (known: {known})")]
    UnknownSource { id: String, known: String },

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },
}

impl CommonError {
    pub fn invalid_parameter(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param: param.into(),
            message: message.into(),
        }
    }
}
