use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// HMAC signing secret for all token purposes. Must be at least 32 bytes;
    /// `load()` refuses to start without one (fail closed, no weak default).
    pub signing_secret: String,
    /// Tenant used when no subdomain/header/query override resolves.
    pub default_tenant: String,
    /// Top-level domain whose subdomain labels name tenants
    /// (e.g. `pilotgate.app` → `acme.pilotgate.app` is tenant `acme`).
    pub base_domain: String,
    /// Optional parent domain for the session cookie so sibling tenant
    /// subdomains share the session.
    pub cookie_domain: Option<String>,
    /// Admins configured at the environment level, merged with each
    /// tenant's `adminEmails`.
    pub static_admin_emails: Vec<String>,
    /// Approvers configured at the environment level, merged with each
    /// tenant's `approverEmails`.
    pub static_approver_emails: Vec<String>,
    /// Object store URL: `s3://bucket?region=...`, `file:///path`, or
    /// `memory://` for tests and local dev.
    pub store_url: String,
    /// HTTP endpoint of the email-sending API. None = transport not
    /// configured (sign-in link issuance will 503).
    pub mail_endpoint: Option<String>,
    pub mail_from: String,
    /// External base URL used when building magic/approve links.
    pub public_base_url: String,
    /// Magic-link issuance limit per source IP per window.
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub config_cache_ttl_secs: u64,
    pub production: bool,
}

/// Minimum signing secret length in bytes. Short secrets make the HMAC
/// brute-forceable, so we refuse to run with one.
pub const MIN_SECRET_BYTES: usize = 32;

pub fn validate_secret(secret: &str) -> anyhow::Result<()> {
    if secret.len() < MIN_SECRET_BYTES {
        anyhow::bail!(
            "PILOTGATE_SIGNING_SECRET must be at least {} bytes (got {})",
            MIN_SECRET_BYTES,
            secret.len()
        );
    }
    Ok(())
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let signing_secret = std::env::var("PILOTGATE_SIGNING_SECRET")
        .map_err(|_| anyhow::anyhow!("PILOTGATE_SIGNING_SECRET is not set"))?;
    validate_secret(&signing_secret)?;

    let production = std::env::var("PILOTGATE_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .map(|v| v == "production")
        .unwrap_or(false);

    Ok(Config {
        port: parse_port(std::env::var("PILOTGATE_PORT").ok())?,
        signing_secret,
        default_tenant: std::env::var("PILOTGATE_DEFAULT_TENANT")
            .unwrap_or_else(|_| "default".into()),
        base_domain: std::env::var("PILOTGATE_BASE_DOMAIN")
            .unwrap_or_else(|_| "pilotgate.app".into()),
        cookie_domain: std::env::var("PILOTGATE_COOKIE_DOMAIN").ok(),
        static_admin_emails: email_list(std::env::var("PILOTGATE_ADMIN_EMAILS").ok()),
        static_approver_emails: email_list(std::env::var("PILOTGATE_APPROVER_EMAILS").ok()),
        store_url: std::env::var("PILOTGATE_STORE_URL")
            .unwrap_or_else(|_| "memory://".into()),
        mail_endpoint: std::env::var("PILOTGATE_MAIL_ENDPOINT").ok(),
        mail_from: std::env::var("PILOTGATE_MAIL_FROM")
            .unwrap_or_else(|_| "no-reply@pilotgate.app".into()),
        public_base_url: std::env::var("PILOTGATE_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into()),
        rate_limit_max: std::env::var("PILOTGATE_RATE_LIMIT_MAX")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5),
        rate_limit_window_secs: std::env::var("PILOTGATE_RATE_LIMIT_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600),
        config_cache_ttl_secs: std::env::var("PILOTGATE_CONFIG_CACHE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        production,
    })
}

/// Unset means the default; a set-but-unparseable value is a startup
/// error, not something to paper over with the default.
fn parse_port(raw: Option<String>) -> anyhow::Result<u16> {
    match raw {
        Some(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("PILOTGATE_PORT is not a valid port: {:?}", v)),
        None => Ok(8080),
    }
}

fn email_list(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secret_is_rejected() {
        assert!(validate_secret("too-short").is_err());
        assert!(validate_secret("").is_err());
        assert!(validate_secret(&"x".repeat(32)).is_ok());
    }

    #[test]
    fn malformed_port_is_an_error_not_a_default() {
        assert!(parse_port(Some("eight".into())).is_err());
        assert!(parse_port(Some("70000".into())).is_err());
        assert_eq!(parse_port(Some("3000".into())).unwrap(), 3000);
        assert_eq!(parse_port(None).unwrap(), 8080);
    }

    #[test]
    fn email_list_normalizes() {
        let got = email_list(Some(" Ops@Example.com , ,pilot@x.y ".into()));
        assert_eq!(got, vec!["ops@example.com", "pilot@x.y"]);
    }
}
