//! Session token lookup on incoming requests.

use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;

/// Cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "token";

/// Header carrying the session token for non-browser clients (`Token`).
pub const TOKEN_HEADER: &str = "token";

/// Session token from the `token` cookie, else the `Token` header.
/// Empty values count as absent.
pub fn session_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(TOKEN_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_owned());
        }
    }
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
