use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("shared store error: {0}")]
    Store(#[from] ao_keyspace::StoreError),
    #[error("payload decode error: {0}")]
    Decode(#[from] anyhow::Error),
    #[error("invalid state: {0}")]
    InvalidState(String),
}
