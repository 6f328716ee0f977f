use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Malformed request, e.g. an unparseable multipart body
    #[error("{message}")]
    BadRequest { message: String },

    /// Declared content type is not accepted by the content filter
    #[error("Content type {content_type:?} is not allowed")]
    UnsupportedMediaType { content_type: String },

    /// File or request body exceeds the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Upload capacity exhausted
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Destination name would escape the storage directory
    #[error("Refusing to store file under unsafe name {name:?}")]
    InvalidName { name: String },

    /// Could not produce a fresh file name (every candidate already existed)
    #[error("Exhausted {attempts} attempts to generate a unique file name")]
    NameExhausted { attempts: usize },

    /// Filesystem failure: directory bootstrap, disk write, truncated upload stream
    #[error("Failed to {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    /// Wrap an I/O error with a description of what was being attempted.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            operation: operation.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::InvalidName { .. } | Error::NameExhausted { .. } | Error::Io { .. } | Error::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True when a write failed because the destination name was already taken.
    pub fn is_name_collision(&self) -> bool {
        matches!(self, Error::Io { source, .. } if source.kind() == std::io::ErrorKind::AlreadyExists)
    }

    /// True for errors caused by the client's input rather than a server fault.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Returns a user-safe error message, without leaking paths or OS error details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::PayloadTooLarge { message } | Error::TooManyRequests { message } => message.clone(),
            Error::UnsupportedMediaType { content_type } => {
                if content_type.is_empty() {
                    "Missing content type for uploaded file".to_string()
                } else {
                    format!("Content type '{content_type}' is not allowed")
                }
            }
            Error::InvalidName { .. } | Error::NameExhausted { .. } | Error::Io { .. } | Error::Internal { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Client errors are expected traffic, not system faults
        match &self {
            Error::InvalidName { .. } | Error::NameExhausted { .. } | Error::Io { .. } | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::info!("Upload capacity exhausted: {}", self);
            }
            Error::BadRequest { .. } | Error::UnsupportedMediaType { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
