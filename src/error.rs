//! Error types for contract bindings

use alloy::primitives::Bytes;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the library
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The ABI itself could not be parsed or loaded
    #[error("ABI error: {0}")]
    Abi(String),

    /// Caller-supplied method, arguments or filter values don't match the ABI
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A call result or log doesn't match the shape the ABI declares
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Transport or node failure, including reverted execution
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Terminal condition on a live log feed
    #[error("Subscription error: {0}")]
    Subscription(BackendError),
}

impl Error {
    pub(crate) fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }

    pub(crate) fn decoding(msg: impl Into<String>) -> Self {
        Error::Decoding(msg.into())
    }

    /// Revert data attached to a backend or subscription failure, if any
    pub fn revert_data(&self) -> Option<&Bytes> {
        match self {
            Error::Backend(e) | Error::Subscription(e) => e.revert_data.as_ref(),
            _ => None,
        }
    }
}

/// Failure reported by a [`Backend`](crate::ethereum::backend::Backend)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
    /// Raw revert payload returned by the node for a failed execution
    pub revert_data: Option<Bytes>,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            revert_data: None,
        }
    }

    pub fn reverted(message: impl Into<String>, data: Bytes) -> Self {
        Self {
            message: message.into(),
            revert_data: Some(data),
        }
    }
}
