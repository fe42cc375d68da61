use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Precondition failed before any request was issued.
    Validation,
    /// The request never completed (connect, timeout, reset).
    Transport,
    /// The backend answered with a non-2xx status or `success: false`.
    Backend,
    /// The backend answered 2xx but the body did not match the contract.
    Decode,
}

/// Normalized failure of a remote operation, carrying a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Transport, message)
    }

    pub fn backend(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Backend,
            message: message.into(),
            status,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Decode, message)
    }
}
