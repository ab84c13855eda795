use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown session: {session_id}")]
    UnknownSession { session_id: String },

    #[error("No record at ({session_id}, {seq})")]
    NoSuchRecord { session_id: String, seq: u64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
