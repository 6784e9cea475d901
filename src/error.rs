//! Unified error model for the storage core.
//! Every backend adapter maps its engine errors into `AppError` so callers can
//! tell "access denied" (a normal `Decision`) apart from "could not determine
//! access" (an error), and retryable backend failures apart from bad input.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Lock held by another owner. `owner` is the current holder.
    #[error("{code}: {message}")]
    Conflict { code: String, message: String, #[serde(default)] owner: Option<String> },
    #[error("{code}: {message}")]
    PermissionDenied { code: String, message: String },
    #[error("{code}: {message}")]
    MalformedInput { code: String, message: String },
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    /// Transient engine or I/O failure. Never to be read as a grant.
    #[error("{code}: {message}")]
    BackendUnavailable { code: String, message: String },
    #[error("{code}: {message}")]
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Conflict { code, .. }
            | AppError::PermissionDenied { code, .. }
            | AppError::MalformedInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::BackendUnavailable { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Conflict { message, .. }
            | AppError::PermissionDenied { message, .. }
            | AppError::MalformedInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::BackendUnavailable { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    /// Lock conflict carrying the identity of the current lock owner.
    pub fn lock_conflict(node: impl std::fmt::Display, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        AppError::Conflict { code: "lock_conflict".into(), message: format!("node {} is locked by {}", node, owner), owner: Some(owner) }
    }
    pub fn conflict(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Conflict { code: code.into(), message: msg.into(), owner: None } }
    pub fn denied(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::PermissionDenied { code: code.into(), message: msg.into() } }
    pub fn malformed(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::MalformedInput { code: code.into(), message: msg.into() } }
    pub fn not_found(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn unavailable(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::BackendUnavailable { code: code.into(), message: msg.into() } }
    pub fn internal(code: impl Into<String>, msg: impl Into<String>) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Wrap any engine error as a backend failure tagged with the backend name.
    pub fn backend(backend: &str, err: impl std::fmt::Display) -> Self {
        AppError::BackendUnavailable { code: format!("{}_unavailable", backend), message: err.to_string() }
    }

    /// Owner of the conflicting lock, when this is a lock conflict.
    pub fn conflict_owner(&self) -> Option<&str> {
        match self {
            AppError::Conflict { owner, .. } => owner.as_deref(),
            _ => None,
        }
    }

    /// Only backend failures are worth retrying; the core never retries itself.
    pub fn is_retryable(&self) -> bool { matches!(self, AppError::BackendUnavailable { .. }) }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Conflict { .. } => 409,
            AppError::PermissionDenied { .. } => 403,
            AppError::MalformedInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::BackendUnavailable { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }

    /// Message suitable for end users ("locked by X", retry hints).
    pub fn user_message(&self) -> String {
        match self {
            AppError::Conflict { owner: Some(o), .. } => format!("Document is locked by {}", o),
            AppError::BackendUnavailable { .. } => "Storage temporarily unavailable, please retry".to_string(),
            other => other.message().to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self { AppError::backend("sql", err) }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: config/IO edges surface as backend failures
        AppError::BackendUnavailable { code: "io".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
