#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Resource not found")]
    NotFound,
    #[error("Invalid input")]
    InvalidInput,
    #[error("Permissions denied")]
    PermissionsDenied,
    #[error("Failed to deserialize stored value")]
    DeserializeError,
    #[error("Failed to serialize value: {0}")]
    Serialization(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Unexpected business state: {0}")]
    BusinessPanic(anyhow::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
