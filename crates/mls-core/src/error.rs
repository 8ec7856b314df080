use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read file metadata: {0}")]
    Metadata(String),

    #[error("invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer stopped accepting chunks before the upload finished.
    #[error("upload stream closed by peer")]
    StreamClosed,

    /// The status stream ended while chunks were still unacknowledged.
    #[error("acknowledgment stream closed with {pending} chunk(s) unacknowledged")]
    AckStreamClosed { pending: usize },

    #[error("file size changed during upload: expected {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl From<iroh::endpoint::ConnectionError> for Error {
    fn from(e: iroh::endpoint::ConnectionError) -> Self {
        Error::ConnectionFailed(e.to_string())
    }
}

impl From<iroh::endpoint::BindError> for Error {
    fn from(e: iroh::endpoint::BindError) -> Self {
        Error::ConnectionFailed(e.to_string())
    }
}

impl From<iroh::endpoint::ConnectError> for Error {
    fn from(e: iroh::endpoint::ConnectError) -> Self {
        Error::ConnectionFailed(e.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
