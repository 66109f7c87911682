use colloquy_core::backend::BackendError;
use thiserror::Error;

pub type IpcResult<T> = std::result::Result<T, IpcError>;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to start backend process: {0}")]
    Spawn(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("backend connection closed")]
    Closed,
    /// The backend handled the request and returned an error payload.
    #[error("{0}")]
    Rejected(String),
}

impl From<IpcError> for BackendError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Rejected(message) => BackendError::Rejected(message),
            IpcError::Codec(e) => BackendError::Serialization(e),
            IpcError::Closed => BackendError::ChannelClosed,
            other => BackendError::Transport(other.to_string()),
        }
    }
}
