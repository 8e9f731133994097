//! Error types for the Password Safe library.

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type PwsResult<T> = Result<T, PwsError>;

/// Errors produced while reading, mutating or writing a password database.
#[derive(Debug, Error)]
pub enum PwsError {
    /// Clean end of the underlying stream. Recovered at the record-loop
    /// boundary and never surfaced from `open`.
    #[error("end of file")]
    EndOfFile,

    /// Bytes were available but fewer than requested.
    #[error("truncated read: wanted {wanted} bytes, got {got}")]
    Truncated {
        /// Bytes requested.
        wanted: usize,
        /// Bytes actually read.
        got: usize,
    },

    /// The header does not match any known format family.
    #[error("unsupported file version")]
    UnsupportedFileVersion,

    /// Key-material verification failed.
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// Truncated stream, bad padding or an invalid field length.
    #[error("corrupt file: {0}")]
    CorruptFile(String),

    /// Mutating operation on a read-only database.
    #[error("database is read-only")]
    ReadOnly,

    /// The storage changed underneath an open handle.
    #[error("storage modified since it was opened")]
    ConcurrentModification,

    /// A cryptographic primitive is unavailable. Fatal.
    #[error("crypto initialisation failed: {0}")]
    CryptoInit(String),

    /// Seal/unseal failure in the in-memory cage. Fatal: indicates internal
    /// corruption, never user input.
    #[error("memory key failure: {0}")]
    MemoryKey(String),

    /// A passphrase policy that cannot produce a password.
    #[error("invalid passphrase policy")]
    InvalidPassphrasePolicy,

    /// Operation on a disposed database.
    #[error("database has been disposed")]
    Disposed,

    /// Record index outside the sealed list.
    #[error("record index {0} out of range")]
    IndexOutOfRange(usize),

    /// Invalid input parameter.
    #[error("invalid input '{parameter}': {reason}")]
    InvalidInput {
        /// Name of the offending parameter.
        parameter: String,
        /// Description of the issue.
        reason: String,
    },

    /// An I/O operation failed.
    #[error("i/o error during {context}: {source}")]
    Io {
        /// The operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl PwsError {
    /// Creates a corrupt-file error.
    pub fn corrupt<S: Into<String>>(context: S) -> Self {
        Self::CorruptFile(context.into())
    }

    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input<P: Into<String>, R: Into<String>>(parameter: P, reason: R) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a memory-key error.
    pub fn memory_key<S: Into<String>>(context: S) -> Self {
        Self::MemoryKey(context.into())
    }

    /// Creates a crypto-initialisation error.
    pub fn crypto_init<S: Into<String>>(context: S) -> Self {
        Self::CryptoInit(context.into())
    }
}
