use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReembolsoError {
    #[error("{0}")]
    Validation(String),

    #[error("ERP API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No handler for {method} {path}")]
    NotFound { method: String, path: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ReembolsoError {
    /// Message suitable for showing to the user verbatim.
    ///
    /// Backend failures carry the most specific message the ERP returned;
    /// validation failures carry the item-indexed message.
    pub fn user_message(&self) -> String {
        match self {
            ReembolsoError::Validation(msg) => msg.clone(),
            ReembolsoError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReembolsoError>;
