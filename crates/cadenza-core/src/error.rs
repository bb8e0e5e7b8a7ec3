//! Error types for cadenza-core.

use crate::compat::String;
use thiserror::Error;

/// Error type for cadenza-core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("URI map has been torn down")]
    UriMapClosed,

    #[error("Invalid URI: {0:?}")]
    InvalidUri(String),
}

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;
