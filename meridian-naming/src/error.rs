use thiserror::Error;

pub type Result<T> = std::result::Result<T, NamingError>;

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
