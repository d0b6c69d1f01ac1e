//! Request transport.
//!
//! The facade only needs `post(body) -> response mapping`. Any
//! `Fn(&str) -> Result<Value, TransportError>` is a transport, which keeps
//! tests free of sockets; [`HttpTransport`] posts to the remote application.

use serde_json::Value;

use crate::error::TransportError;
use crate::types::json_type_name;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends one JSON request and returns the decoded response mapping.
pub trait Transport {
    fn post(&self, body: &str) -> Result<Value, TransportError>;
}

impl<F> Transport for F
where
    F: Fn(&str) -> Result<Value, TransportError>,
{
    fn post(&self, body: &str) -> Result<Value, TransportError> {
        self(body)
    }
}

/// Decode a response body, which must be a JSON object.
pub fn decode_response(text: &str) -> Result<Value, TransportError> {
    let value: Value =
        serde_json::from_str(text).map_err(|source| TransportError::InvalidJson { source })?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(TransportError::NotAnObject {
            actual: json_type_name(&value).to_string(),
        })
    }
}

/// Blocking HTTP transport bound to one URL.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
}

#[cfg(feature = "remote")]
impl HttpTransport {
    /// Create a transport posting to `url` with the default timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(url, HTTP_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let url = url.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| TransportError::Http {
                url: url.clone(),
                source,
            })?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(feature = "remote")]
impl Transport for HttpTransport {
    fn post(&self, body: &str) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .map_err(|source| TransportError::Http {
                url: self.url.clone(),
                source,
            })?;

        // Check for HTTP errors before parsing
        let response = response
            .error_for_status()
            .map_err(|source| TransportError::Http {
                url: self.url.clone(),
                source,
            })?;

        let text = response.text().map_err(|source| TransportError::Http {
            url: self.url.clone(),
            source,
        })?;
        decode_response(&text)
    }
}
