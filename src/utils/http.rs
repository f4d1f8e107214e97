// src/utils/http.rs

//! HTTP client utilities.

use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::models::HttpConfig;

/// Characters of an error body kept in error details.
const MAX_BODY_PREVIEW: usize = 500;

/// Create the HTTP client handed to a backend.
///
/// Certificates are verified unless the engine configuration or the backend
/// itself explicitly opts out.
pub fn create_client(config: &HttpConfig, backend_verify_ssl: bool) -> Result<reqwest::Client> {
    let verify = config.verify_ssl && backend_verify_ssl;
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout())
        .danger_accept_invalid_certs(!verify)
        .build()?;
    Ok(client)
}

/// Failure of [`get_json`], keeping the response body for diagnostics.
#[derive(Debug)]
pub enum FetchError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    Json { error: serde_json::Error, body: String },
}

impl FetchError {
    pub fn message(&self) -> String {
        match self {
            FetchError::Http(e) => format!("HTTP error: {e}"),
            FetchError::Status { status, .. } => format!("Remote returned HTTP {status}"),
            FetchError::Json { error, .. } => format!("Unable to parse response: {error}"),
        }
    }

    pub fn details(&self) -> Option<String> {
        match self {
            FetchError::Http(e) => Some(format!("{e:?}")),
            FetchError::Status { body, .. } | FetchError::Json { body, .. } => {
                Some(body.chars().take(MAX_BODY_PREVIEW).collect())
            }
        }
    }
}

impl From<FetchError> for crate::error::DiscoveryError {
    fn from(e: FetchError) -> Self {
        let err = Self::new(e.message());
        match e.details() {
            Some(details) => err.with_details(details),
            None => err,
        }
    }
}

impl From<FetchError> for crate::error::ItemError {
    fn from(e: FetchError) -> Self {
        let err = Self::new(e.message());
        match e.details() {
            Some(details) => err.with_details(details),
            None => err,
        }
    }
}

/// GET a URL and decode its JSON body.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<T, FetchError> {
    let response = client.get(url).send().await.map_err(FetchError::Http)?;
    let status = response.status();
    let body = response.text().await.map_err(FetchError::Http)?;
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|error| FetchError::Json { error, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_client_with_defaults() {
        assert!(create_client(&HttpConfig::default(), true).is_ok());
    }

    #[test]
    fn builds_client_without_verification() {
        let config = HttpConfig {
            verify_ssl: false,
            ..HttpConfig::default()
        };
        assert!(create_client(&config, true).is_ok());
    }

    #[test]
    fn status_error_keeps_truncated_body() {
        let err = FetchError::Status {
            status: 502,
            body: "x".repeat(2_000),
        };
        assert_eq!(err.message(), "Remote returned HTTP 502");
        assert_eq!(err.details().unwrap().len(), MAX_BODY_PREVIEW);
    }
}
