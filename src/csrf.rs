//! Anti-forgery guard
//!
//! Double-submit tokens: `GET /auth/antiforgery` sets an HttpOnly cookie
//! and returns the same token in the body; every mutating call must echo
//! it in the `X-CSRF-Token` header. The two values are compared in
//! constant time. Clients meeting a rejection fetch a fresh token and
//! retry exactly once.

use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;
use constant_time_eq::constant_time_eq;

use crate::utils::crypto;

/// Cookie carrying the anti-forgery token
pub const CSRF_COOKIE: &str = "gh_csrf";

/// Header mutating requests must carry
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Anti-forgery rejection
#[derive(Debug, PartialEq, Eq)]
pub struct CsrfRejected;

impl std::fmt::Display for CsrfRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anti-forgery token missing or invalid")
    }
}

impl std::error::Error for CsrfRejected {}

pub struct CsrfGuard {
    cookie_secure: bool,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(cookie_secure: bool) -> Self {
        Self { cookie_secure }
    }

    /// Mint a fresh token and its session-bound cookie
    #[must_use]
    pub fn issue(&self) -> (String, Cookie<'static>) {
        let token = crypto::generate_csrf_token();
        let cookie = Cookie::build(CSRF_COOKIE, token.clone())
            .path("/")
            .http_only(true)
            .secure(self.cookie_secure)
            .same_site(SameSite::Lax)
            .finish();
        (token, cookie)
    }

    /// Validate the header token against the cookie token
    ///
    /// # Errors
    /// Returns [`CsrfRejected`] when either side is missing or they do not
    /// match.
    pub fn validate(&self, req: &HttpRequest) -> Result<(), CsrfRejected> {
        let cookie_token = req.cookie(CSRF_COOKIE).ok_or(CsrfRejected)?;
        let header_token = req
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(CsrfRejected)?;

        if cookie_token.value().is_empty()
            || !constant_time_eq(cookie_token.value().as_bytes(), header_token.as_bytes())
        {
            return Err(CsrfRejected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn guard() -> CsrfGuard {
        CsrfGuard::new(false)
    }

    #[test]
    fn issued_cookie_is_http_only_and_lax() {
        let (token, cookie) = guard().issue();
        assert_eq!(cookie.name(), CSRF_COOKIE);
        assert_eq!(cookie.value(), token);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn matching_header_and_cookie_pass() {
        let (token, cookie) = guard().issue();
        let req = TestRequest::default()
            .cookie(cookie)
            .insert_header((CSRF_HEADER, token))
            .to_http_request();
        assert!(guard().validate(&req).is_ok());
    }

    #[test]
    fn missing_header_is_rejected() {
        let (_, cookie) = guard().issue();
        let req = TestRequest::default().cookie(cookie).to_http_request();
        assert_eq!(guard().validate(&req), Err(CsrfRejected));
    }

    #[test]
    fn mismatched_token_is_rejected() {
        let (_, cookie) = guard().issue();
        let req = TestRequest::default()
            .cookie(cookie)
            .insert_header((CSRF_HEADER, "some-other-token"))
            .to_http_request();
        assert_eq!(guard().validate(&req), Err(CsrfRejected));
    }

    #[test]
    fn missing_cookie_is_rejected() {
        let req = TestRequest::default()
            .insert_header((CSRF_HEADER, "token-without-cookie"))
            .to_http_request();
        assert_eq!(guard().validate(&req), Err(CsrfRejected));
    }
}
