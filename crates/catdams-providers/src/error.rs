use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Circuit open for provider {provider}")]
    CircuitOpen { provider: String },

    #[error("No provider configured: {0}")]
    Unavailable(String),
}

impl GatewayError {
    /// Transient failures are worth a retry: network-level trouble, 5xx,
    /// and 429 carrying a Retry-After. Parse/schema problems and an open
    /// circuit are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::Timeout { .. } => true,
            GatewayError::Api { status, .. } => *status >= 500,
            GatewayError::RateLimited { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
