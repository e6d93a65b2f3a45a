//! Parse errors for the fundamental types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex value: {0}")]
    InvalidHex(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),
}
