use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("WebSocket connection error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid subscription topic: {0}")]
    InvalidTopic(String),

    #[error("Transport is not open")]
    NotConnected,

    #[error("Transport send failed: {0}")]
    SendFailed(String),

    #[error("Tracker runtime has shut down")]
    RuntimeClosed,

    #[error("Metrics server error: {0}")]
    MetricsError(String),
}

impl TrackerError {
    /// Frame-level errors: the frame is dropped and the connection carries on.
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            TrackerError::SerdeError(_)
                | TrackerError::UnknownEventKind(_)
                | TrackerError::InvalidFrame(_)
        )
    }
}
