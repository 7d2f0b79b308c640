//! Error types for the backref library.

use thiserror::Error;

/// Result type alias for backref operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compressing or decompressing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A stream was created or used with invalid parameters: window or
    /// look-ahead below the minimum, look-ahead larger than the window, or
    /// an operation applied to a stream opened in the wrong direction.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying byte source or sink failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// A fixed-capacity output buffer filled up.
    #[error("out of memory: output buffer is full")]
    OutOfMemory,

    /// The compressed stream is malformed: bad magic, unsupported version,
    /// invalid header parameters, or a token that references data outside
    /// the window.
    #[error("corrupt stream: {0}")]
    CorruptStream(String),

    /// The compressed stream ended in the middle of a token.
    #[error("unexpected end of stream")]
    UnexpectedEof,
}

impl From<std::io::Error> for Error {
    /// Wraps the error's display form so `Error` stays `Clone + PartialEq`.
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
