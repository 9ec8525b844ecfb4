//! SessionGate — runs before every page route.
//!
//! Resolves the tenant, verifies the `pilot_session` cookie with the
//! edge-safe verifier, and either annotates the request with the signed-in
//! user or redirects to the login page (preserving any tenant override).
//! API routes do their own session checks and return 401/403 instead of
//! redirecting.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use chrono::Utc;

use crate::edge;
use crate::tenant::query_param;
use crate::AppState;

pub const SESSION_COOKIE: &str = "pilot_session";

/// Identity attached to a request after the gate has verified the session.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub email: String,
    pub tenant: String,
}

/// Tenant tag attached to every gated request, valid session or not.
#[derive(Debug, Clone)]
pub struct RequestTenant(pub String);

pub async fn session_gate(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let tenant = state.tenants.resolve(req.headers(), req.uri());
    req.extensions_mut().insert(RequestTenant(tenant.clone()));

    let verified = cookie_value(req.headers(), SESSION_COOKIE).and_then(|token| {
        edge::verify_token(
            state.config.signing_secret.as_bytes(),
            "session",
            token,
            Utc::now().timestamp(),
        )
    });

    match verified {
        Some(email) => {
            req.extensions_mut().insert(AuthedUser { email, tenant });
            next.run(req).await
        }
        None => {
            // keep an explicit ?tenant= override across the redirect
            let target = match req.uri().query().and_then(|q| query_param(q, "tenant")) {
                Some(t) => format!("/login?tenant={}", urlencoding::encode(&t)),
                None => "/login".to_string(),
            };
            Redirect::to(&target).into_response()
        }
    }
}

/// Pull a named cookie out of the Cookie header(s).
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for header in headers.get_all(axum::http::header::COOKIE) {
        let raw = header.to_str().ok()?;
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                if k == name {
                    return Some(v);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_cookie_among_many() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "theme=dark; pilot_session=abc.def; lang=en".parse().unwrap(),
        );
        assert_eq!(cookie_value(&headers, SESSION_COOKIE), Some("abc.def"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }
}
