use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use time::OffsetDateTime;

use crate::config::SessionConfig;

/// Cookie carrying the opaque session token, expiring with the session.
pub fn session_cookie(
    config: &SessionConfig,
    token: String,
    expires_utc: DateTime<Utc>,
) -> Cookie<'static> {
    let mut builder = Cookie::build((config.cookie_name.clone(), token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .secure(config.cookie_secure);

    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_utc.timestamp()) {
        builder = builder.expires(expires);
    }

    builder.build()
}

/// Expired counterpart of [`session_cookie`], instructing the client to drop it.
pub fn removal_cookie(config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((config.cookie_name.clone(), ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .secure(config.cookie_secure)
        .build()
}

/// The session token presented by the caller, if any.
pub fn session_token(jar: &CookieJar, config: &SessionConfig) -> Option<String> {
    jar.get(&config.cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}
