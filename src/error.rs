use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection attempt timed out")]
    ConnectTimeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("session is not connected")]
    NotConnected,
    #[error("session credentials rejected by the network")]
    Unauthorized,
}

/// Outbound send failures are surfaced synchronously to the command caller.
/// The core never retries a send on its own.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("instance is not connected")]
    NotConnected,
    #[error("send timed out; delivery state is unknown and a blind retry may duplicate the message")]
    Timeout,
    #[error("invalid outgoing payload: {0}")]
    InvalidPayload(String),
    #[error("network rejected the message: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media download failed: {0}")]
    Download(String),
    #[error("media decryption failed: {0}")]
    Decrypt(String),
    #[error("envelope carries no downloadable media")]
    NoMedia,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("instance {0} not found")]
    InstanceNotFound(String),
    #[error("instance {0} is not connected")]
    NotConnected(String),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
