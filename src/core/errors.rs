use thiserror::Error;
use crate::utils::RateLimitPolicy;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported service: {0}")]
    UnsupportedService(String),

    #[error("Failed to initialize plugin '{service}': {message}")]
    PluginInitialization {
        service: String,
        message: String,
    },

    #[error("Plugin upload failed: {0}")]
    PluginUpload(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: status code {status_code}, message: {message}")]
    ServerError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by server: {0}")]
    RateLimited(String),

    #[error("Client error: status code {status_code}, message: {message}")]
    ClientError {
        status_code: u16,
        message: String,
    },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Gallery preparation failed: {0}")]
    Preparation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error("Config error: {0}")]
    Config(String),

    #[error("A batch is already running")]
    BatchInProgress,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn client_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::ClientError {
            status_code,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 按 HTTP 状态码归类错误
    ///
    /// - 429 -> `RateLimited`
    /// - 其他 4xx -> `ClientError`
    /// - 5xx 以及其他非成功状态 -> `ServerError`
    pub fn from_status(status_code: u16, body: &str) -> Self {
        let message = truncate_body(body);
        match status_code {
            429 => Self::RateLimited(message),
            400..=499 => Self::client_error(status_code, message),
            _ => Self::server_error(status_code, message),
        }
    }

    /// 再试一次是否可能成功
    pub fn is_retryable(&self, rate_limit: RateLimitPolicy) -> bool {
        match self {
            Self::Timeout | Self::Network(_) | Self::ServerError { .. } => true,
            Self::RateLimited(_) => rate_limit == RateLimitPolicy::Retry,
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() {
            return Self::MalformedResponse(err.to_string());
        }
        if err.is_builder() {
            return Self::Internal(err.to_string());
        }
        // connect / DNS / reset / body
        Self::Network(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    const MAX_LEN: usize = 200;
    let body = body.trim();
    match body.char_indices().nth(MAX_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// 结果类型别名
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
