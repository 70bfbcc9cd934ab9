use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("not found")]
    NotFound,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for relayhub_core::HubError {
    fn from(e: StoreError) -> Self {
        relayhub_core::HubError::StoreUnavailable(e.to_string())
    }
}
