use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("client is closing")]
    Closing,

    #[error("no leader known yet")]
    NoLeader,

    #[error("failed to open tso stream: {0}")]
    StreamOpen(String),

    #[error("failed to send on tso stream: {0}")]
    StreamSend(String),

    #[error("failed to receive from tso stream: {0}")]
    StreamRecv(String),

    #[error("tso batch length mismatch: sent {sent}, got {got}")]
    BatchLengthMismatch { sent: u32, got: u32 },

    #[error("tso batch deadline exceeded")]
    BatchTimeout,

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("store {0} not found")]
    StoreNotFound(u64),
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Rpc(status.to_string())
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::StreamOpen(err.to_string())
    }
}
