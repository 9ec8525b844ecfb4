//! Per-request tenant resolution.
//!
//! Tenants are subdomain labels of the configured base domain
//! (`acme.pilotgate.app` → `acme`). The service sits behind proxies that
//! rewrite some but not all host headers, hence the redundant hostname
//! derivation chain. Resolved ids are validated against a strict pattern
//! before they are ever used to build storage keys.

use axum::http::{HeaderMap, Uri};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static TENANT_RE: Lazy<Regex> = Lazy::new(|| Regex::new("^[a-z0-9]+$").unwrap());

/// Header a trusted internal caller may set to pin the tenant explicitly.
pub const TENANT_HEADER: &str = "x-pilotgate-tenant";

pub fn is_valid_tenant(id: &str) -> bool {
    TENANT_RE.is_match(id)
}

#[derive(Clone)]
pub struct TenantResolver {
    base_domain: String,
    default_tenant: String,
}

impl TenantResolver {
    pub fn new(base_domain: &str, default_tenant: &str) -> Self {
        Self {
            base_domain: base_domain.to_lowercase(),
            default_tenant: default_tenant.to_lowercase(),
        }
    }

    pub fn default_tenant(&self) -> &str {
        &self.default_tenant
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Precedence: trusted header → subdomain of the base domain →
    /// query override (local hosts only) → configured default.
    pub fn resolve(&self, headers: &HeaderMap, uri: &Uri) -> String {
        if let Some(id) = header_str(headers, TENANT_HEADER) {
            let id = id.trim().to_lowercase();
            if is_valid_tenant(&id) {
                return id;
            }
            tracing::warn!(header = %id, "ignoring malformed tenant header");
        }

        if let Some(host) = self.effective_hostname(headers, uri) {
            if host == self.base_domain {
                return self.default_tenant.clone();
            }
            if let Some(rest) = host.strip_suffix(&format!(".{}", self.base_domain)) {
                // label immediately left of the base domain
                if let Some(label) = rest.rsplit('.').next() {
                    if is_valid_tenant(label) {
                        return label.to_string();
                    }
                }
            }
            if is_local_host(&host) {
                if let Some(id) = uri.query().and_then(|q| query_param(q, "tenant")) {
                    let id = id.to_lowercase();
                    if is_valid_tenant(&id) {
                        return id;
                    }
                }
            }
        }

        self.default_tenant.clone()
    }

    /// Resolution for emailed-link landings (`/auth/verify`,
    /// `/admin/approve`). Those links carry the tenant explicitly in the
    /// query because the mail client may open them on the apex host, where
    /// the hostname chain would resolve to the default tenant. The routes
    /// are token-authed and tenant ids are validated, so the query is safe
    /// to honor on any host here; everywhere else it stays local-only.
    pub fn resolve_link_landing(&self, headers: &HeaderMap, uri: &Uri) -> String {
        if let Some(id) = uri.query().and_then(|q| query_param(q, "tenant")) {
            let id = id.trim().to_lowercase();
            if is_valid_tenant(&id) {
                return id;
            }
            tracing::warn!(tenant = %id, "ignoring malformed tenant in link query");
        }
        self.resolve(headers, uri)
    }

    /// forwarded-host → host → origin → referer → request URI, where the
    /// origin/referer hosts only count when they sit under the base domain.
    fn effective_hostname(&self, headers: &HeaderMap, uri: &Uri) -> Option<String> {
        if let Some(v) = header_str(headers, "x-forwarded-host") {
            if let Some(first) = v.split(',').next() {
                let h = strip_port(first.trim());
                if !h.is_empty() {
                    return Some(h.to_lowercase());
                }
            }
        }
        if let Some(v) = header_str(headers, "host") {
            let h = strip_port(v.trim());
            if !h.is_empty() {
                return Some(h.to_lowercase());
            }
        }
        for name in ["origin", "referer"] {
            if let Some(h) = header_str(headers, name)
                .and_then(|v| Url::parse(v).ok())
                .and_then(|u| u.host_str().map(str::to_lowercase))
            {
                if h == self.base_domain || h.ends_with(&format!(".{}", self.base_domain)) {
                    return Some(h);
                }
            }
        }
        uri.host().map(|h| strip_port(h).to_lowercase())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

fn is_local_host(host: &str) -> bool {
    host == "localhost" || host.starts_with("127.") || host == "0.0.0.0"
}

/// Pull a single query parameter out of a raw query string.
pub fn query_param(query: &str, key: &str) -> Option<String> {
    for part in query.split('&') {
        let mut kv = part.splitn(2, '=');
        if kv.next() == Some(key) {
            return kv
                .next()
                .map(|v| urlencoding::decode(v).unwrap_or_default().into_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TenantResolver {
        TenantResolver::new("pilotgate.app", "default")
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                v.parse().unwrap(),
            );
        }
        map
    }

    #[test]
    fn subdomain_becomes_tenant() {
        let uri: Uri = "/".parse().unwrap();
        let got = resolver().resolve(&headers(&[("host", "acme.pilotgate.app")]), &uri);
        assert_eq!(got, "acme");
    }

    #[test]
    fn bare_root_domain_is_default_tenant() {
        let uri: Uri = "/".parse().unwrap();
        let got = resolver().resolve(&headers(&[("host", "pilotgate.app")]), &uri);
        assert_eq!(got, "default");
    }

    #[test]
    fn trusted_header_wins_over_host() {
        let uri: Uri = "/".parse().unwrap();
        let hs = headers(&[
            (TENANT_HEADER, "crew9"),
            ("host", "acme.pilotgate.app"),
        ]);
        assert_eq!(resolver().resolve(&hs, &uri), "crew9");
    }

    #[test]
    fn malformed_header_is_ignored() {
        let uri: Uri = "/".parse().unwrap();
        let hs = headers(&[
            (TENANT_HEADER, "../../etc"),
            ("host", "acme.pilotgate.app"),
        ]);
        assert_eq!(resolver().resolve(&hs, &uri), "acme");
    }

    #[test]
    fn forwarded_host_beats_host() {
        let uri: Uri = "/".parse().unwrap();
        let hs = headers(&[
            ("x-forwarded-host", "sky.pilotgate.app, proxy.internal"),
            ("host", "internal-lb:8080"),
        ]);
        assert_eq!(resolver().resolve(&hs, &uri), "sky");
    }

    #[test]
    fn localhost_honors_query_override() {
        let uri: Uri = "/login?tenant=acme".parse().unwrap();
        let got = resolver().resolve(&headers(&[("host", "localhost:8080")]), &uri);
        assert_eq!(got, "acme");
    }

    #[test]
    fn query_override_needs_local_host() {
        let uri: Uri = "/login?tenant=acme".parse().unwrap();
        let got = resolver().resolve(&headers(&[("host", "other.example.com")]), &uri);
        assert_eq!(got, "default");
    }

    #[test]
    fn unknown_host_falls_back_to_default() {
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(resolver().resolve(&HeaderMap::new(), &uri), "default");
    }

    #[test]
    fn origin_only_counts_under_base_domain() {
        let uri: Uri = "/".parse().unwrap();
        let hs = headers(&[("origin", "https://evil.example.com")]);
        assert_eq!(resolver().resolve(&hs, &uri), "default");
        let hs = headers(&[("origin", "https://acme.pilotgate.app")]);
        assert_eq!(resolver().resolve(&hs, &uri), "acme");
    }

    #[test]
    fn link_landing_honors_query_on_apex_host() {
        let uri: Uri = "/admin/approve?token=abc&tenant=acme".parse().unwrap();
        let got = resolver().resolve_link_landing(&headers(&[("host", "pilotgate.app")]), &uri);
        assert_eq!(got, "acme");
    }

    #[test]
    fn link_landing_ignores_malformed_query_tenant() {
        let uri: Uri = "/admin/approve?token=abc&tenant=..%2F..".parse().unwrap();
        let got = resolver().resolve_link_landing(&headers(&[("host", "sky.pilotgate.app")]), &uri);
        assert_eq!(got, "sky");
    }

    #[test]
    fn link_landing_falls_back_to_host_chain() {
        let uri: Uri = "/auth/verify?token=abc".parse().unwrap();
        let got = resolver().resolve_link_landing(&headers(&[("host", "sky.pilotgate.app")]), &uri);
        assert_eq!(got, "sky");
    }

    #[test]
    fn tenant_pattern_is_strict() {
        assert!(is_valid_tenant("acme9"));
        assert!(!is_valid_tenant("Acme"));
        assert!(!is_valid_tenant("a/b"));
        assert!(!is_valid_tenant("a.b"));
        assert!(!is_valid_tenant(""));
    }
}
