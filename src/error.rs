use thiserror::Error;

/// Errors surfaced by the record store adapter.
///
/// `DuplicateKey` is distinguishable so the ingestor can fall back to a
/// lookup by natural key instead of treating the insert as fatal.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Errors that abort ingestion of a whole block. Per-input resolution
/// failures are not errors at this level; they become skip events.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("blocks must be ingested in ascending height order: got {got}, expected {expected}")]
    OutOfOrder { got: i64, expected: i64 },
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}
