//! Error taxonomy
//!
//! Business-rule violations, missing records, platform failures and storage
//! failures are kept apart so callers can decide what to retry.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

pub type Result<T> = std::result::Result<T, CompetitionError>;

/// Why a call to an external platform failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalErrorKind {
    AuthFailed,
    Forbidden,
    RateLimited,
    TokenExchange,
    ProfileVerification,
    Configuration,
    Generic,
}

impl ExternalErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailed => "auth_failed",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::TokenExchange => "token_exchange_failed",
            Self::ProfileVerification => "profile_verification_failed",
            Self::Configuration => "configuration",
            Self::Generic => "generic",
        }
    }
}

/// Platform-tagged failure of an external API call
#[derive(Debug, Clone, thiserror::Error)]
#[error("{platform} API error ({}): {message}", kind.as_str())]
pub struct ExternalApiError {
    pub platform: String,
    pub kind: ExternalErrorKind,
    pub message: String,
}

impl ExternalApiError {
    pub fn new(
        platform: impl Into<String>,
        kind: ExternalErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            kind,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(platform: &str, status: u16, body: &str) -> Self {
        let kind = match status {
            401 => ExternalErrorKind::AuthFailed,
            403 => ExternalErrorKind::Forbidden,
            429 => ExternalErrorKind::RateLimited,
            _ => ExternalErrorKind::Generic,
        };
        let message = match kind {
            ExternalErrorKind::AuthFailed => "authentication failed".to_string(),
            ExternalErrorKind::Forbidden => "insufficient permission".to_string(),
            ExternalErrorKind::RateLimited => "rate limit exceeded".to_string(),
            _ => format!("HTTP {}: {}", status, truncate(body, 200)),
        };
        Self::new(platform, kind, message)
    }

    pub fn generic(platform: &str, message: impl Into<String>) -> Self {
        Self::new(platform, ExternalErrorKind::Generic, message)
    }

    pub fn configuration(platform: &str, message: impl Into<String>) -> Self {
        Self::new(platform, ExternalErrorKind::Configuration, message)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Domain-level error for competition management
#[derive(Debug, thiserror::Error)]
pub enum CompetitionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    ExternalApi(#[from] ExternalApiError),

    #[error("{message}")]
    Domain { code: &'static str, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CompetitionError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn domain(code: &'static str, msg: impl Into<String>) -> Self {
        Self::Domain {
            code,
            message: msg.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ExternalApi(_) => "EXTERNAL_API_ERROR",
            Self::Domain { code, .. } => *code,
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ExternalApi(e) => match e.kind {
                ExternalErrorKind::AuthFailed
                | ExternalErrorKind::TokenExchange
                | ExternalErrorKind::ProfileVerification => StatusCode::UNAUTHORIZED,
                ExternalErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ExternalErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                ExternalErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
                ExternalErrorKind::Generic => StatusCode::BAD_GATEWAY,
            },
            Self::Domain { .. } => StatusCode::CONFLICT,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for CompetitionError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CompetitionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {}", e))
    }
}

impl IntoResponse for CompetitionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        });
        if let Self::ExternalApi(e) = &self {
            body["error"]["platform"] = json!(e.platform);
            body["error"]["reason"] = json!(e.kind.as_str());
        }
        (status, Json(body)).into_response()
    }
}
