// src/error.rs

//! Unified error handling for the harvesting engine.
//!
//! [`AppError`] is what every action returns to its caller. Failures raised by
//! backends while harvesting are a different family: [`DiscoveryError`] and
//! [`ItemError`] are captured into the job they happened in and never leave
//! the orchestrator.

use std::fmt;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// A single offending field reported by a validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Unknown source, job or item identifier
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad source fields, every offending field listed
    #[error("Validation error: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// Unknown backend or backend config the engine cannot honour
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A non-terminal job already exists for the source
    #[error("Source {slug} already has a running job ({job_id})")]
    AlreadyRunning { slug: String, job_id: String },

    /// Crontab or interval expression could not be parsed
    #[error("Invalid schedule '{expr}': {message}")]
    InvalidSchedule { expr: String, message: String },

    /// Document store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Task queue failure
    #[error("Queue error: {0}")]
    Queue(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl AppError {
    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a validation error for a single field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Create a schedule parsing error.
    pub fn schedule(expr: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::InvalidSchedule {
            expr: expr.into(),
            message: message.to_string(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl fmt::Display) -> Self {
        Self::Store(message.to_string())
    }

    /// Create a queue error.
    pub fn queue(message: impl fmt::Display) -> Self {
        Self::Queue(message.to_string())
    }

    /// Offending fields when this is a validation error.
    pub fn fields(&self) -> &[FieldError] {
        match self {
            Self::Validation(errors) => errors,
            _ => &[],
        }
    }
}

/// Backend discovery (`initialize`) failure. Fatal to the job only.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct DiscoveryError {
    pub message: String,
    pub details: Option<String>,
}

impl DiscoveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Backend `process` failure. Fatal to the item only.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ItemError {
    pub message: String,
    pub details: Option<String>,
}

impl ItemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::new(format!("HTTP error: {e}")).with_details(format!("{e:?}"))
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("Unable to parse response: {e}")).with_details(format!("{e:?}"))
    }
}

impl From<url::ParseError> for DiscoveryError {
    fn from(e: url::ParseError) -> Self {
        Self::new(format!("Invalid URL: {e}"))
    }
}

impl From<reqwest::Error> for ItemError {
    fn from(e: reqwest::Error) -> Self {
        Self::new(format!("HTTP error: {e}")).with_details(format!("{e:?}"))
    }
}

impl From<serde_json::Error> for ItemError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("Unable to parse response: {e}")).with_details(format!("{e:?}"))
    }
}

impl From<url::ParseError> for ItemError {
    fn from(e: url::ParseError) -> Self {
        Self::new(format!("Invalid URL: {e}"))
    }
}
