//! Errors returned by the HTTP handlers and their plain-text responses.

use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use nsite_engine::GatewayError;

/// Errors returned by the request handler.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The pipeline could not serve the request.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The request named no host.
    #[error("missing host header")]
    MissingHost,

    /// Only GET and HEAD are served.
    #[error("method not allowed")]
    MethodNotAllowed,
}

impl HttpError {
    /// Map to an HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Gateway(e) => e.status(),
            Self::MissingHost => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        let mut response = (status, self.to_string()).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        if matches!(self, Self::MethodNotAllowed) {
            headers.insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}
