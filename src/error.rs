use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Not enough data to train or serve; callers fall back or retry after
    /// more data arrives.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: i64 },

    /// Internal invariant broken by the input data (degenerate matrices,
    /// mismatched shapes).
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
