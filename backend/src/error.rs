use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("Token signing error: {0}")]
    Token(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Serialize)]
pub struct MessageBody {
    pub message: String,
}

impl MessageBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::UsernameTaken(_) => StatusCode::CONFLICT,
            AuthError::Io(_)
            | AuthError::Serialization(_)
            | AuthError::PasswordHash(_)
            | AuthError::Token(_)
            | AuthError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Internal failures are never echoed back.
    fn public_message(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "Signup fail",
            AuthError::InvalidCredentials => "Invalid credentials",
            AuthError::UsernameTaken(_) => "Username already taken",
            AuthError::InvalidToken => "Invalid or expired token",
            _ => "Internal server error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(MessageBody::new(self.public_message()))).into_response()
    }
}
