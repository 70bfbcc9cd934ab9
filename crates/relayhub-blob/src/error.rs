use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid or expired download token")]
    InvalidToken,
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, BlobError>;

impl From<BlobError> for relayhub_core::HubError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(key) => relayhub_core::HubError::Internal(format!("blob not found: {key}")),
            other => relayhub_core::HubError::UpstreamFailure(other.to_string()),
        }
    }
}
