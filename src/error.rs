//! Error types and HTTP status code mapping.

use std::fmt;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

/// Every failure the dispatcher and its HTTP front end can produce.
///
/// The first three variants belong to the dispatch core; the rest are
/// raised only by configuration loading and the request layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A malformed identifier or a non-positive weight.
    InvalidArgument(String),
    /// No backend with the given identifier exists.
    NotFound(String),
    /// The dispatcher cannot serve a selection (empty pool, poisoned lock).
    InvalidState(String),
    /// The configuration file could not be loaded, parsed, or validated.
    Config(String),
    /// The request body or query could not be understood.
    BadRequest(String),
    /// The request body is larger than the accepted limit.
    PayloadTooLarge { limit: usize },
    /// The route exists but does not accept this method.
    MethodNotAllowed,
    /// An internal error that does not fit other categories.
    Internal(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::NotFound(id) => write!(f, "unknown backend id: {id}"),
            Self::InvalidState(msg) => write!(f, "invalid dispatcher state: {msg}"),
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
            Self::PayloadTooLarge { limit } => {
                write!(f, "request body exceeds the {limit} byte limit")
            }
            Self::MethodNotAllowed => write!(f, "method not allowed"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl DispatchError {
    /// Returns the HTTP status code corresponding to this error variant.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidState(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable tag used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Config(_) => "config_error",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Converts this error into an HTTP response with a JSON body.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        Response::builder()
            .status(status)
            .header("content-type", "application/json; charset=utf-8")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap_or_else(|_| {
                let mut fallback = Response::new(Full::new(Bytes::new()));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            })
    }
}

impl From<hyper::Error> for DispatchError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<hyper::http::Error> for DispatchError {
    fn from(err: hyper::http::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}
