use derive_more::derive::Display;
use reqwest::StatusCode;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Display)]
pub enum AppError {
    #[display("Not found: {_0}")]
    NotFound(String),
    #[display("Bad request: {_0}")]
    BadRequest(String),
    #[display("Unauthorized: {_0}")]
    Unauthorized(String),
    #[display("Conflict: {_0}")]
    Conflict(String),
    #[display("Request took too long")]
    RequestTimeout,
    #[display("Too many requests")]
    TooManyRequests,
    #[display("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },
    #[display("Transport error: {_0}")]
    Transport(String),
    #[display("Invalid provider response: {_0}")]
    InvalidResponse(String),
    #[display("Configuration error: {_0}")]
    Config(String),
    #[display("Internal error: {_0}")]
    Internal(anyhow::Error),
}

impl std::error::Error for AppError {}

impl AppError {
    /// Errors worth another attempt: timeouts, throttling, 5xx and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::RequestTimeout | AppError::TooManyRequests | AppError::Transport(_) => true,
            AppError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::BAD_REQUEST => AppError::BadRequest(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Unauthorized(message),
            StatusCode::NOT_FOUND => AppError::NotFound(message),
            StatusCode::CONFLICT => AppError::Conflict(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => AppError::RequestTimeout,
            StatusCode::TOO_MANY_REQUESTS => AppError::TooManyRequests,
            _ => AppError::Upstream {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(error)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        tracing::debug!("Reqwest error: {:?}", error);
        if error.is_timeout() {
            return AppError::RequestTimeout;
        }
        match error.status() {
            Some(status) => AppError::from_status(status, error.to_string()),
            None if error.is_decode() => AppError::InvalidResponse(error.to_string()),
            None => AppError::Transport(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        AppError::InvalidResponse(error.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}
