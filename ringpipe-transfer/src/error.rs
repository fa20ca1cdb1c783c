use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("timed out retrieving key '{key}' after {waited:?}")]
    RetrieveTimeout { key: String, waited: Duration },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("metadata channel error: {0}")]
    Channel(String),
    #[error("transfer fault: {0}")]
    TransferFault(String),
    #[error("memory is not registered: ptr={ptr:#x}")]
    MemoryNotRegistered { ptr: u64 },
    #[error("unknown or released handle: {0}")]
    InvalidHandle(u64),
    #[error("handle {0} has an unresolved transfer in flight")]
    HandleBusy(u64),
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("batch length mismatch: local={local}, remote={remote}")]
    BatchLengthMismatch { local: usize, remote: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
