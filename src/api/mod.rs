use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::middleware::session::session_gate;
use crate::AppState;

pub mod handlers;

/// Assemble the full route table. Page routes sit behind the session gate;
/// auth/admin API routes check the session themselves (401/403 instead of
/// redirects); the token-authed verify/approve links and the login page
/// are public.
pub fn router(state: Arc<AppState>) -> Router {
    let pages = Router::new()
        .route("/", get(handlers::app_home))
        .route("/admin", get(handlers::admin_home))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            session_gate,
        ));

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/login", get(handlers::login_page))
        .route("/auth/request-link", post(handlers::request_link))
        .route("/auth/verify", get(handlers::verify_link))
        .route("/auth/me", get(handlers::me))
        .route("/admin/approve", get(handlers::approve_link))
        .route(
            "/admin/whitelist",
            get(handlers::get_whitelist).post(handlers::mutate_whitelist),
        )
        .merge(pages)
        .with_state(state)
}
