use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unreachable at '{path}': {reason}")]
    StoreUnreachable { path: String, reason: String },

    #[error("Required table '{table}' is missing")]
    MissingTable { table: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown pipeline mode '{0}'")]
    UnknownMode(String),

    #[error("Bronze retry buffer full: {buffered} rows pending, capacity {capacity}")]
    BufferFull { buffered: usize, capacity: usize },

    #[error("Malformed row '{id}': {reason}")]
    Malformed { id: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// True for failures that a later attempt against the same store may fix.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::StoreUnreachable { .. } => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::ReadOnly
            ),
            _ => false,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
