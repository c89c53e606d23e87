use thiserror::Error;

/// Errors produced by the mcpe supervisor and its attach protocol.
#[derive(Debug, Error)]
pub enum McpeError {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Rendered verbatim to callers, so keep the text stable.
    #[error("Timeout")]
    Timeout,

    #[error("closed: {0}")]
    Closed(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type McpeResult<T> = Result<T, McpeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_renders_as_plain_word() {
        assert_eq!(McpeError::Timeout.to_string(), "Timeout");
    }

    #[test]
    fn io_errors_convert() {
        let err: McpeError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, McpeError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
