//! Error types for polarway-cursor

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Close error: {0}")]
    Close(String),

    #[error("Stream destroyed: {0}")]
    Destroyed(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl StreamError {
    /// Wrap a cursor failure raised while fetching a batch.
    pub fn fetch(err: anyhow::Error) -> Self {
        StreamError::Fetch(format!("{:#}", err))
    }

    /// Wrap a cursor failure raised while closing.
    pub fn close(err: anyhow::Error) -> Self {
        StreamError::Close(format!("{:#}", err))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, StreamError::Config(_))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_fetch_error_keeps_context_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("connection reset"))
            .context("FETCH 10 FROM cursor")
            .unwrap_err();

        let wrapped = StreamError::fetch(err);
        assert_eq!(
            wrapped.to_string(),
            "Fetch error: FETCH 10 FROM cursor: connection reset"
        );
    }

    #[test]
    fn test_json_error_is_config_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(StreamError::from(err).is_config());
    }
}
