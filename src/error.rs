use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayscopeError {
    #[error("Unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("Ambiguous intent: {0}")]
    AmbiguousIntent(String),

    #[error("No exactly resolved entities: {0}")]
    NoExactEntities(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PayscopeError>;
