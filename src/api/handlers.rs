//! Auth and admin handlers.
//!
//! Browser-facing token flows (verify, approve) redirect with a
//! machine-readable error code instead of returning API errors; JSON
//! routes go through `AppError` and its status mapping.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header::SET_COOKIE, HeaderMap, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::middleware::session::{cookie_value, AuthedUser, SESSION_COOKIE};
use crate::rate_limit::UNKNOWN_SOURCE;
use crate::store::whitelist::normalize_email;
use crate::tenant::{is_valid_tenant, query_param};
use crate::token::TokenPurpose;
use crate::AppState;

const SESSION_MAX_AGE_SECS: i64 = 30 * 24 * 3600;

#[derive(Deserialize)]
pub struct RequestLinkBody {
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistAction {
    Add,
    Remove,
    Approve,
    Deny,
    SendLink,
}

#[derive(Deserialize)]
pub struct WhitelistActionBody {
    pub action: WhitelistAction,
    pub email: String,
}

// ── Auth flows ───────────────────────────────────────────────

/// POST /auth/request-link — rate-limited magic-link issuance, or pending
/// enrollment with approver notification for unknown emails.
pub async fn request_link(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<RequestLinkBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let source = client_ip(&headers);
    let decision = state.limiter.check(&source);
    if !decision.allowed {
        tracing::warn!(source = %source, "rate limited magic-link request");
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let email = normalize_email(&body.email);
    if email.len() < 3 || !email.contains('@') || email.contains(char::is_whitespace) {
        return Err(AppError::InvalidRequest("invalid email address".into()));
    }

    let tenant = state.tenants.resolve(&headers, &uri);
    let tenant_cfg = state.tenant_configs.get(&tenant).await?;

    let is_known = state.whitelist.is_whitelisted(&tenant, &email).await?
        || is_admin(&state, &tenant_cfg.admin_emails, &email);

    if is_known {
        if !state.mailer.is_configured() {
            return Err(AppError::NotConfigured("mail endpoint".into()));
        }
        let token = state.tokens.issue(TokenPurpose::Magic, &email)?;
        let link = format!(
            "{}/auth/verify?token={}&tenant={}",
            link_base(&state, &tenant),
            urlencoding::encode(&token),
            tenant
        );
        state
            .mailer
            .send(
                &email,
                "Your sign-in link",
                &format!(
                    "<p>Click to sign in:</p><p><a href=\"{}\">Sign in</a></p>\
                     <p>The link is valid for 30 days.</p>",
                    link
                ),
            )
            .await?;
        tracing::info!(tenant = %tenant, "magic link sent");
        return Ok(Json(json!({ "status": "sent" })));
    }

    let outcome = state.whitelist.add_pending_request(&tenant, &email).await?;
    if outcome.added {
        notify_approvers(&state, &tenant, &tenant_cfg.approver_emails, &email).await;
        tracing::info!(tenant = %tenant, "access request enqueued");
    }
    Ok(Json(json!({ "status": "pending" })))
}

/// GET /auth/verify?token= — consume a magic link, set the session cookie.
pub async fn verify_link(
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> Response {
    let token = uri.query().and_then(|q| query_param(q, "token"));
    let email = match token.and_then(|t| state.tokens.verify(TokenPurpose::Magic, &t)) {
        Some(email) => email,
        None => return login_redirect(&uri, "invalid_token"),
    };

    let session = match state.tokens.issue(TokenPurpose::Session, &email) {
        Ok(s) => s,
        Err(e) => return AppError::Internal(e).into_response(),
    };

    // keep a valid tenant override so local sign-in lands on the same
    // tenant the link was requested for
    let target = match uri.query().and_then(|q| query_param(q, "tenant")) {
        Some(t) if is_valid_tenant(&t.to_lowercase()) => {
            format!("/?tenant={}", t.to_lowercase())
        }
        _ => "/".to_string(),
    };
    let mut resp = Redirect::to(&target).into_response();
    match session_cookie(&state, &session).parse::<axum::http::HeaderValue>() {
        Ok(value) => {
            resp.headers_mut().insert(SET_COOKIE, value);
            resp
        }
        Err(_) => AppError::Internal(anyhow::anyhow!("unencodable session cookie")).into_response(),
    }
}

/// GET /auth/me — identity plus the tenant config subset the UI needs.
pub async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<serde_json::Value>, AppError> {
    let email = require_session(&state, &headers)?;
    let tenant = state.tenants.resolve(&headers, &uri);
    let cfg = state.tenant_configs.get(&tenant).await?;

    Ok(Json(json!({
        "email": email,
        "tenant": tenant,
        "isAdmin": is_admin(&state, &cfg.admin_emails, &email),
        "config": {
            "name": cfg.name,
            "logo": cfg.logo,
            "features": cfg.features,
        },
    })))
}

// ── Admin flows ──────────────────────────────────────────────

/// GET /admin/approve?token= — one-click approval from the notification
/// email. Token-authed; the approver may not have a session yet.
pub async fn approve_link(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let token = uri.query().and_then(|q| query_param(q, "token"));
    let email = match token.and_then(|t| state.tokens.verify(TokenPurpose::Approve, &t)) {
        Some(email) => email,
        None => return Redirect::to("/admin?error=invalid_token").into_response(),
    };

    // Emailed links may be opened on the apex host; the tenant the link
    // was issued for rides in the query (see resolve_link_landing).
    let tenant = state.tenants.resolve_link_landing(&headers, &uri);
    match state.whitelist.approve(&tenant, &email).await {
        Ok(_) => {
            tracing::info!(tenant = %tenant, "pending email approved via link");
            Redirect::to(&format!("/admin?approved={}", urlencoding::encode(&email)))
                .into_response()
        }
        Err(e) => {
            tracing::error!(tenant = %tenant, "approve failed: {}", e);
            Redirect::to("/admin?error=approve_failed").into_response()
        }
    }
}

/// GET /admin/whitelist — full document for the admin UI.
pub async fn get_whitelist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Json<serde_json::Value>, AppError> {
    let tenant = state.tenants.resolve(&headers, &uri);
    require_admin(&state, &headers, &tenant).await?;
    let doc = state.whitelist.document(&tenant).await?;
    Ok(Json(serde_json::to_value(doc).map_err(anyhow::Error::from)?))
}

/// POST /admin/whitelist — `{action: add|remove|approve|deny|send_link, email}`.
pub async fn mutate_whitelist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    Json(body): Json<WhitelistActionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tenant = state.tenants.resolve(&headers, &uri);
    require_admin(&state, &headers, &tenant).await?;

    let email = normalize_email(&body.email);
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::InvalidRequest("invalid email address".into()));
    }

    let doc = match body.action {
        WhitelistAction::Add => state.whitelist.add(&tenant, &email).await?,
        WhitelistAction::Remove => state.whitelist.remove(&tenant, &email).await?,
        WhitelistAction::Approve => state.whitelist.approve(&tenant, &email).await?,
        WhitelistAction::Deny => state.whitelist.deny(&tenant, &email).await?,
        WhitelistAction::SendLink => {
            if !state.mailer.is_configured() {
                return Err(AppError::NotConfigured("mail endpoint".into()));
            }
            let token = state.tokens.issue(TokenPurpose::Magic, &email)?;
            let link = format!(
                "{}/auth/verify?token={}&tenant={}",
                link_base(&state, &tenant),
                urlencoding::encode(&token),
                tenant
            );
            state
                .mailer
                .send(
                    &email,
                    "Your sign-in link",
                    &format!("<p><a href=\"{}\">Sign in</a></p>", link),
                )
                .await?;
            return Ok(Json(json!({ "status": "sent" })));
        }
    };
    Ok(Json(serde_json::to_value(doc).map_err(anyhow::Error::from)?))
}

// ── Pages (rendering proper is a different service; these are shells) ──

pub async fn login_page() -> Html<&'static str> {
    Html(
        "<!doctype html><title>Sign in</title>\
         <h1>Sign in</h1><p>Request a sign-in link by email.</p>",
    )
}

pub async fn app_home(Extension(user): Extension<AuthedUser>) -> Html<String> {
    Html(format!(
        "<!doctype html><title>PilotGate</title><p>Signed in as {} ({})</p>",
        user.email, user.tenant
    ))
}

pub async fn admin_home(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthedUser>,
) -> Result<Html<String>, AppError> {
    let cfg = state.tenant_configs.get(&user.tenant).await?;
    if !is_admin(&state, &cfg.admin_emails, &user.email) {
        return Err(AppError::Forbidden);
    }
    Ok(Html(format!(
        "<!doctype html><title>Admin</title><p>Whitelist admin for {}</p>",
        user.tenant
    )))
}

// ── Helpers ──────────────────────────────────────────────────

/// Base URL for emailed links. When the public base URL sits on the bare
/// base domain, the link is pinned to the tenant's own subdomain so the
/// landing request resolves to the tenant it was issued for. On local
/// hosts the base URL is kept as-is and the `tenant` query carries it.
fn link_base(state: &AppState, tenant: &str) -> String {
    let base = state.config.public_base_url.trim_end_matches('/');
    if let Ok(mut url) = url::Url::parse(base) {
        if url.host_str() == Some(state.tenants.base_domain()) {
            let host = format!("{}.{}", tenant, state.tenants.base_domain());
            if url.set_host(Some(&host)).is_ok() {
                return url.to_string().trim_end_matches('/').to_string();
            }
        }
    }
    base.to_string()
}

/// First hop of x-forwarded-for, else the shared "unknown" bucket.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
}

/// Verify the session cookie on an API route (full-runtime verifier).
fn require_session(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    cookie_value(headers, SESSION_COOKIE)
        .and_then(|token| state.tokens.verify(TokenPurpose::Session, token))
        .ok_or(AppError::Unauthorized)
}

async fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    tenant: &str,
) -> Result<String, AppError> {
    let email = require_session(state, headers)?;
    let cfg = state.tenant_configs.get(tenant).await?;
    if !is_admin(state, &cfg.admin_emails, &email) {
        return Err(AppError::Forbidden);
    }
    Ok(email)
}

/// Tenant admins plus the statically configured ones.
fn is_admin(state: &AppState, tenant_admins: &[String], email: &str) -> bool {
    tenant_admins.iter().any(|a| a == email)
        || state.config.static_admin_emails.iter().any(|a| a == email)
}

fn login_redirect(uri: &Uri, code: &str) -> Response {
    let target = match uri.query().and_then(|q| query_param(q, "tenant")) {
        Some(t) => format!("/login?error={}&tenant={}", code, urlencoding::encode(&t)),
        None => format!("/login?error={}", code),
    };
    Redirect::to(&target).into_response()
}

fn session_cookie(state: &AppState, token: &str) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        SESSION_COOKIE, token, SESSION_MAX_AGE_SECS
    );
    if let Some(domain) = &state.config.cookie_domain {
        cookie.push_str(&format!("; Domain={}", domain));
    }
    if state.config.production {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Best effort: a failed approver notification must not fail the
/// requester's flow, the pending entry is already persisted.
async fn notify_approvers(state: &AppState, tenant: &str, tenant_approvers: &[String], email: &str) {
    let mut approvers: Vec<&String> = tenant_approvers
        .iter()
        .chain(state.config.static_approver_emails.iter())
        .collect();
    approvers.sort();
    approvers.dedup();

    if approvers.is_empty() {
        tracing::warn!(tenant, "pending request but no approvers configured");
        return;
    }

    let token = match state.tokens.issue(TokenPurpose::Approve, email) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(tenant, "could not issue approve token: {}", e);
            return;
        }
    };
    let link = format!(
        "{}/admin/approve?token={}&tenant={}",
        link_base(state, tenant),
        urlencoding::encode(&token),
        tenant
    );
    let html = format!(
        "<p><b>{}</b> requested access to tenant <b>{}</b>.</p>\
         <p><a href=\"{}\">Approve</a> (valid 7 days), or manage the \
         request from the admin page.</p>",
        email, tenant, link
    );

    for approver in approvers {
        if let Err(e) = state.mailer.send(approver, "Access request", &html).await {
            tracing::warn!(tenant, approver = %approver, "approver notification failed: {}", e);
        }
    }
}
