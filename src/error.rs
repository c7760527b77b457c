use thiserror::Error;

/// Failures while fetching and decoding the secret bundle.
///
/// Every variant names the secret so a single line on stderr is enough to
/// tell which bundle could not be set.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The backend call itself failed (network, auth, missing secret)
    #[error("Error setting secret {secret}: {message}")]
    Backend { secret: String, message: String },

    #[error("Error setting secret {secret}: payload is not valid UTF-8")]
    InvalidUtf8 {
        secret: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Error setting secret {secret}: payload is not valid JSON")]
    InvalidJson {
        secret: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Error setting secret {secret}: payload must be a JSON object with key-value pairs")]
    NotAnObject { secret: String },

    #[error("Error setting secret {secret}: payload has no field {field}")]
    MissingField { secret: String, field: String },
}

impl FetchError {
    pub(crate) fn backend(secret: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            secret: secret.to_string(),
            message: message.into(),
        }
    }
}
