use stratum::Rid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// First-updater-wins conflict; the transaction has been tainted and
    /// must be aborted by the client.
    #[error("write-write conflict on {0:?}")]
    WriteWriteConflict(Rid),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("malformed tuple: {0}")]
    MalformedTuple(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}
