use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table not created; call ensure_table first")]
    TableNotReady,
    #[error("column {0} is not part of table")]
    UnknownColumn(String),
    #[error("stored table {table} does not match schema: {reason}")]
    SchemaMismatch { table: String, reason: String },
    #[error("corrupt store line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by server: HTTP {0}")]
    Rejected(u16),
    #[error("encoding error: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("upload failed after {uploaded} rows: {source}")]
    Upload {
        uploaded: usize,
        #[source]
        source: UploadError,
    },
}
