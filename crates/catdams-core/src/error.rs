use thiserror::Error;

/// Cross-cutting error taxonomy.
///
/// Only three kinds ever surface to an ingest caller: `InvalidInput`,
/// `Overloaded`, and `Shutdown`. Everything else is absorbed into module
/// `analysis_mode` downgrades and aggregate confidence.
#[derive(Debug, Error)]
pub enum CatdamsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Queue full, try again later")]
    Overloaded,

    #[error("Shutting down, event rejected")]
    Shutdown,

    #[error("Interaction store unavailable: {0}")]
    Store(String),

    #[error("Persistence sink unavailable: {0}")]
    Sink(String),

    #[error("Analysis gateway failed: {0}")]
    Gateway(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CatdamsError {
    /// Short stable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CatdamsError::Config(_) => "CONFIG_ERROR",
            CatdamsError::InvalidInput(_) => "INVALID_INPUT",
            CatdamsError::Overloaded => "OVERLOADED",
            CatdamsError::Shutdown => "SHUTDOWN",
            CatdamsError::Store(_) => "STORE_UNAVAILABLE",
            CatdamsError::Sink(_) => "SINK_UNAVAILABLE",
            CatdamsError::Gateway(_) => "GATEWAY_FAILED",
            CatdamsError::Serialization(_) => "SERIALIZATION_ERROR",
            CatdamsError::Io(_) => "IO_ERROR",
            CatdamsError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CatdamsError>;
