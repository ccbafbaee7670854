use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Catalog could not be built: missing columns, no week columns, bad numerics
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Box #{0} not found")]
    NotFound(u32),

    #[error("Box #{0} already exists")]
    Duplicate(u32),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Store, audit log or export file could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(format!("I/O error: {e}"))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(format!("JSON error: {e}"))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Persistence(format!("DB error: {e}"))
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        EngineError::Persistence(format!("CSV error: {e}"))
    }
}
