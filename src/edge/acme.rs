//! Plain-HTTP duties of the edge: answering ACME HTTP-01 challenges from
//! the webroot an external ACME client writes into, and redirecting
//! everything else to HTTPS once a certificate is in place.

use axum::{
    extract::{OriginalUri, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::TypedHeader;
use headers::Host;
use tracing::debug;

use super::EdgeState;

pub const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// Tokens are base64url; anything else could escape the webroot.
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// GET /.well-known/acme-challenge/{token}
pub async fn acme_challenge(State(state): State<EdgeState>, Path(token): Path<String>) -> Response {
    let Some(webroot) = state.acme_webroot.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if !is_valid_token(&token) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = webroot.join(CHALLENGE_DIR).join(&token);
    match tokio::fs::read(&path).await {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain")], body).into_response(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ACME challenge not found");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Fallback for the plain listener once TLS is enabled.
pub async fn redirect_to_https(
    State(state): State<EdgeState>,
    TypedHeader(host): TypedHeader<Host>,
    OriginalUri(uri): OriginalUri,
) -> Redirect {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let authority = match state.https_port {
        443 => host.hostname().to_string(),
        port => format!("{}:{port}", host.hostname()),
    };
    Redirect::permanent(&format!("https://{authority}{path_and_query}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_alphabet_is_restricted() {
        assert!(is_valid_token("LoqXcYV8q5ONbJQxbmR7SCTNo3tiAXDfowyjxAjEuX0"));
        assert!(!is_valid_token("../../etc/passwd"));
        assert!(!is_valid_token("a.b"));
        assert!(!is_valid_token(""));
    }
}
