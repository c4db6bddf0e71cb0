use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("controller unreachable executing [{command}] at {url}: {source}")]
    Unavailable {
        command: String,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to execute [{command}]: http status {status}, error: {message} (url {url})")]
    Remote {
        command: String,
        url: String,
        status: u16,
        message: String,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("unexpected response to [{command}]: {message}")]
    Protocol { command: String, message: String },

    #[error("operation [{operation}] failed for '{target}': {text} (error code {code})")]
    OperationFailed {
        operation: String,
        target: String,
        code: String,
        text: String,
    },

    #[error("operation [{operation}] for '{target}' still pending after {attempts} attempts")]
    Timeout {
        operation: String,
        target: String,
        attempts: u32,
    },
}

impl ApiError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ApiError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// The record a lookup matched lacks a field the caller needs.
    pub(crate) fn missing_field(command: &str, kind: &str, name: &str, field: &str) -> Self {
        ApiError::Protocol {
            command: command.to_string(),
            message: format!("{} '{}' has no '{}'", kind, name, field),
        }
    }

    pub(crate) fn protocol(command: &str, message: impl Into<String>) -> Self {
        ApiError::Protocol {
            command: command.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
