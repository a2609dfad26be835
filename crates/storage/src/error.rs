#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The run directory, snapshot, or artifact does not exist (or the
    /// requested name is not a valid single path component).
    #[error("Not found: {0}")]
    NotFound(String),
}
