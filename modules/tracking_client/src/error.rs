#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The server could not be reached, or the connection broke.
    #[error("Network error: {0}")]
    Network(String),
    #[error("{code}: {message}")]
    Server { code: String, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn code(&self) -> &str {
        match self {
            ClientError::Network(_) => "NETWORK_ERROR",
            ClientError::Server { code, .. } => code,
            ClientError::Decode(_) => "SERVER_ERROR",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}
