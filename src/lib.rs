//! PilotGate — access control for multi-tenant pilot apps.
//!
//! Library crate so integration tests in `tests/` can build the router
//! and services against an in-memory object store.

pub mod api;
pub mod cli;
pub mod config;
pub mod edge;
pub mod errors;
pub mod mailer;
pub mod middleware;
pub mod rate_limit;
pub mod store;
pub mod tenant;
pub mod token;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: config::Config,
    pub tokens: token::TokenService,
    pub limiter: rate_limit::RateLimiter,
    pub tenants: tenant::TenantResolver,
    pub tenant_configs: store::config::ConfigStore,
    pub whitelist: store::whitelist::WhitelistStore,
    pub mailer: mailer::Mailer,
}

impl AppState {
    pub fn from_config(cfg: config::Config) -> anyhow::Result<Self> {
        let object_store = store::build_object_store(&cfg.store_url)?;
        let client = store::StoreClient::new(object_store);
        Ok(Self {
            tokens: token::TokenService::new(&cfg.signing_secret)?,
            limiter: rate_limit::RateLimiter::new(cfg.rate_limit_max, cfg.rate_limit_window_secs),
            tenants: tenant::TenantResolver::new(&cfg.base_domain, &cfg.default_tenant),
            tenant_configs: store::config::ConfigStore::new(
                client.clone(),
                cfg.config_cache_ttl_secs,
            ),
            whitelist: store::whitelist::WhitelistStore::new(client),
            mailer: mailer::Mailer::new(cfg.mail_endpoint.clone(), cfg.mail_from.clone()),
            config: cfg,
        })
    }
}
