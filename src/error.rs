use std::io;

use thiserror::Error;

use crate::index::ColumnType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Errors from the backing files, passed through untouched
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A node or log record could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),

    #[error("t must be greater than 1, got {0}")]
    InvalidOrder(usize),

    #[error("key not found")]
    KeyNotFound,

    #[error("type mismatch: column is {expected}, value is {actual}")]
    TypeMismatch {
        expected: ColumnType,
        actual: ColumnType,
    },

    #[error("unique index already holds a row for this value")]
    UniqueViolation,

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True when the error came from a read that ran off the end of a file
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use super::Error;

    #[test]
    fn eof_detection() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(err.is_eof());

        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(!err.is_eof());
        assert!(!Error::KeyNotFound.is_eof());
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::InvalidOrder(1).to_string(),
            "t must be greater than 1, got 1"
        );
        assert_eq!(Error::KeyNotFound.to_string(), "key not found");
    }
}
