//! Error taxonomy shared by the pricing, booking, cache and transport layers.

use thiserror::Error;

/// Every failure the portal core can surface to a caller.
///
/// Variants carry owned strings so a failed query can store its error and hand
/// clones to every subscriber.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PortalError {
    /// Local precondition violated; never reaches the network.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transport failure or timeout.
    #[error("network error: {0}")]
    Network(String),

    /// 401/403 from the backend, or no usable credential.
    #[error("not authorized (status {status})")]
    Auth { status: u16 },

    /// 4xx rejection. `message` is the backend's text, verbatim.
    #[error("{message}")]
    Validation { status: u16, message: String },

    /// 5xx failure.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The backend answered but the body did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Whether a query may be retried automatically.
    ///
    /// Mutations never consult this; writes are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortalError::Network(_) | PortalError::Server { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, PortalError::Auth { .. })
    }

    /// Classify a non-success HTTP response.
    ///
    /// The backend reports failures as `{ "message": "..." }`; when that field is
    /// missing the raw body (or the status reason) is used instead.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = backend_message(body).unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("request failed with status {status}")
            } else {
                trimmed.chars().take(200).collect()
            }
        });

        match status {
            401 | 403 => PortalError::Auth { status },
            400..=499 => PortalError::Validation { status, message },
            _ => PortalError::Server { status, message },
        }
    }
}

fn backend_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(|message| message.as_str())
        .map(str::to_string)
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            PortalError::Decode(err.to_string())
        } else {
            PortalError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for PortalError {
    fn from(err: url::ParseError) -> Self {
        PortalError::InvalidInput(format!("invalid URL: {err}"))
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Decode(err.to_string())
    }
}
