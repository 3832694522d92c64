//! Crate-wide error taxonomy.
//!
//! Every layer (block device, stream, B+Tree, filesystem) raises errors
//! through this single enum. Lower layers never swallow an error from the
//! layer beneath them — they either propagate it via `?` or wrap it with
//! additional context through the `context` string carried on the variant
//! that needs it.

use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not a valid archive: {0}")]
    InvalidFormat(String),

    #[error("integrity check failed: {0}")]
    IntegrityError(String),

    #[error("archive is locked by another process")]
    Locked,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("position mismatch: {0}")]
    PositionMismatch(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(Uuid),

    #[error("invalid mode/value: {0}")]
    ValueError(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
