//! Classification of backend failures into transient and permanent.

use reqwest::StatusCode;

use crate::error::BackendError;

/// Is this error likely to go away if the same request is sent again?
pub trait IsKnownTransient {
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        *self == StatusCode::REQUEST_TIMEOUT
            || *self == StatusCode::TOO_MANY_REQUESTS
            || self.is_server_error()
    }
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            return status.is_known_transient();
        }
        // Body decoding and builder errors will fail the same way next time.
        self.is_timeout() || self.is_connect() || self.is_request()
    }
}

/// Maximum length for error bodies carried into job failures.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates a response body so failures stay readable in listings and logs.
pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body.to_string(),
    }
}

/// Maps a transport error to a [`BackendError`] with the right retry flag.
pub(crate) fn from_reqwest(backend: &str, err: reqwest::Error) -> BackendError {
    let message = format!("request failed: {}", err);
    if err.is_known_transient() {
        BackendError::transient(backend, message)
    } else {
        BackendError::permanent(backend, message)
    }
}

/// Maps a non-success HTTP response to a [`BackendError`].
pub(crate) fn from_status(backend: &str, status: StatusCode, body: &str) -> BackendError {
    let message = format!("HTTP {}: {}", status, truncate_body(body));
    if status.is_known_transient() {
        BackendError::transient(backend, message)
    } else {
        BackendError::permanent(backend, message)
    }
}
