//! HTTP error → KataboxError mapping.

use reqwest::StatusCode;
use serde::Deserialize;

use crate::errors::KataboxError;

/// Machine-readable error body returned by the control plane.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatusBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reason: String,
}

/// Map an error response to a KataboxError.
///
/// Quota rejections arrive as 403 Forbidden with an "exceeded quota"
/// message, not as a dedicated status code; they are classified before
/// the generic auth mapping.
pub(crate) fn map_http_error(status: StatusCode, body: &StatusBody) -> KataboxError {
    match status.as_u16() {
        404 => KataboxError::NotFound(body.message.clone()),
        409 => KataboxError::Conflict(body.message.clone()),
        400 | 422 => KataboxError::Validation(body.message.clone()),
        403 if body.message.contains("exceeded quota") || body.reason == "Forbidden" && body.message.contains("quota") => {
            KataboxError::QuotaExceeded(body.message.clone())
        }
        401 | 403 => KataboxError::Config(format!("cluster auth: {}", body.message)),
        429 | 500..=599 => KataboxError::Unavailable(format!("HTTP {}: {}", status, body.message)),
        _ => KataboxError::Internal(format!("HTTP {}: {}", status, body.message)),
    }
}

/// Map an HTTP error when the body is not a parsable status object.
pub(crate) fn map_http_status(status: StatusCode, text: &str) -> KataboxError {
    map_http_error(
        status,
        &StatusBody {
            message: text.to_string(),
            reason: String::new(),
        },
    )
}

/// Map a transport-level failure.
pub(crate) fn map_transport_error(err: reqwest::Error) -> KataboxError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        KataboxError::Unavailable(err.to_string())
    } else {
        KataboxError::Internal(err.to_string())
    }
}
