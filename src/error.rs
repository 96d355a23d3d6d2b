//! Unified application error model and the authentication flow taxonomy.
//! `AuthError` is what the session flows produce; `AppError` is what the console
//! surface and the admin operations report, with a mapping to process exit codes.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Failures surfaced by the login, initialization and sign-out flows.
///
/// The `Display` output always starts with the stable [`AuthError::reason`] code,
/// which is what ends up in `Session::last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid_credentials")]
    InvalidCredentials,
    #[error("network: {0}")]
    Network(String),
    #[error("already_in_progress")]
    AlreadyInProgress,
    #[error("record_lookup_failed: {0}")]
    RecordLookup(String),
    #[error("invalid_role: {0}")]
    InvalidRole(String),
    #[error("missing_credentials")]
    MissingCredentials,
    #[error("unknown: {0}")]
    Unknown(String),
}

impl AuthError {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::Network(_) => "network",
            AuthError::AlreadyInProgress => "already_in_progress",
            AuthError::RecordLookup(_) => "record_lookup_failed",
            AuthError::InvalidRole(_) => "invalid_role",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    Auth { code: String, message: String },
    Forbidden { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Process exit code; the console exits with it when its last command failed.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::UserInput { .. } => 2,
            AppError::NotFound { .. } => 3,
            AppError::Conflict { .. } => 4,
            AppError::Auth { .. } => 5,
            AppError::Forbidden { .. } => 6,
            AppError::Io { .. } => 7,
            AppError::Internal { .. } => 1,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let code = err.reason().to_string();
        let message = err.to_string();
        match err {
            AuthError::InvalidCredentials | AuthError::InvalidRole(_) => AppError::Auth { code, message },
            AuthError::MissingCredentials => AppError::UserInput { code, message },
            AuthError::AlreadyInProgress => AppError::Conflict { code, message },
            AuthError::Network(_) | AuthError::RecordLookup(_) => AppError::Io { code, message },
            AuthError::Unknown(_) => AppError::Internal { code, message },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: format!("{err:#}") }
    }
}
