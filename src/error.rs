//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Non-success HTTP status while fetching a location.
    #[error("Request to {url} failed with status {status}")]
    Transport { url: String, status: u16 },

    /// Connection, TLS, timeout or body-read failure before a status was known.
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    /// The external lookup produced zero candidates.
    #[error("No candidates found for \"{0}\"")]
    LookupMiss(String),

    /// A response body or image could not be interpreted.
    #[error("Could not decode {context}: {message}")]
    Decode { context: String, message: String },

    #[error("Checkpoint file {} is unreadable: {message}", path.display())]
    CheckpointCorrupt { path: PathBuf, message: String },

    /// Explicit interrupt from the user.
    #[error("Cancelled by user")]
    Cancelled,

    /// A required tool or setting is missing. Fatal only at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Per-entity and per-file errors are recoverable; the batch keeps going.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineError;

    #[test]
    fn test_cancel_and_configuration_are_not_recoverable() {
        assert!(!PipelineError::Cancelled.is_recoverable());
        assert!(!PipelineError::Configuration("no driver".to_string()).is_recoverable());
        assert!(PipelineError::LookupMiss("Zelda".to_string()).is_recoverable());
        assert!(PipelineError::Transport {
            url: "https://example.com/a.jpg".to_string(),
            status: 404,
        }
        .is_recoverable());
    }

    #[test]
    fn test_transport_error_message_names_status_and_url() {
        let error = PipelineError::Transport {
            url: "https://example.com/a.jpg".to_string(),
            status: 503,
        };
        assert_eq!(
            error.to_string(),
            "Request to https://example.com/a.jpg failed with status 503"
        );
    }
}
