//! Attaches the current bearer credential to outgoing requests.

use reqwest::header::{self, HeaderMap, HeaderValue};
use tracing::warn;

use crate::auth::Credential;

/// Set `Authorization: Bearer <token>` when a credential is present.
///
/// Without a credential the request goes out unauthenticated; public
/// endpoints accept that, and protected ones answer 401. A token that is not
/// a legal header value is skipped rather than failing the request.
pub fn attach(headers: &mut HeaderMap, credential: Option<&Credential>) {
    let Some(credential) = credential else {
        return;
    };

    match HeaderValue::from_str(&credential.bearer()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Err(_) => warn!("Stored access token is not a valid header value, sending unauthenticated"),
    }
}
