//! The single request handler.

use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use futures::TryStreamExt;
use http::{HeaderMap, Method, Uri, header};
use tracing::{debug, warn};

use crate::AppState;
use crate::error::HttpError;

/// Serve the file at the request path of the site the `Host` names.
#[tracing::instrument(skip(state, headers), fields(host = tracing::field::Empty))]
pub(crate) async fn serve_site(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(HttpError::MethodNotAllowed);
    }
    let host = request_host(&headers, &uri).ok_or(HttpError::MissingHost)?;
    tracing::Span::current().record("host", host.as_str());

    let content = state.gateway.resolve_content(&host, uri.path()).await?;
    debug!(
        status = %content.status,
        path = %content.record.path,
        length = ?content.content_length,
        "streaming"
    );

    let mut response = Response::new(Body::empty());
    *response.status_mut() = content.status;
    *response.headers_mut() = content.headers();

    let hash = content.record.content_hash;
    let body = content.body.inspect_err(move |e| {
        warn!(%hash, error = %e, "aborting response body");
    });
    *response.body_mut() = Body::from_stream(body);
    Ok(response)
}

/// Hostname of the request without the port. Falls back to the URI
/// authority, which is where HTTP/2 carries it.
fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let raw = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))?;
    let host = strip_port(raw.trim());
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

fn strip_port(authority: &str) -> &str {
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    authority
        .split_once(':')
        .map_or(authority, |(host, _)| host)
}
