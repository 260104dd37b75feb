//! Error types for I/O operations

use densecut_core::Error;
use thiserror::Error;

/// Errors that can occur during I/O operations
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file format: {format}")]
    InvalidFormat { format: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Io(inner) => Error::Io(inner),
            IoError::FileNotFound { path } => Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path),
            )),
            IoError::InvalidFormat { format } => Error::UnsupportedFormat(format),
            other => Error::InvalidData(other.to_string()),
        }
    }
}

impl From<bincode::Error> for IoError {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(inner) => IoError::Io(inner),
            other => IoError::ParseError {
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for IoError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() {
            IoError::Io(e.into())
        } else {
            IoError::ParseError {
                message: e.to_string(),
            }
        }
    }
}
