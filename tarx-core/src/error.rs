use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TarxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Format error: {0}")]
    Format(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("input path should be a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("there was nothing to extract")]
    NothingToExtract,
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, TarxError>;
