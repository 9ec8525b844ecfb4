//! Per-tenant configuration, read-mostly, cached with a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::store::{tenant_key, StoreClient};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    #[serde(default)]
    pub admin_emails: Vec<String>,
    #[serde(default)]
    pub approver_emails: Vec<String>,
    #[serde(default)]
    pub features: HashMap<String, bool>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

struct CacheEntry {
    config: TenantConfig,
    fetched_at: Instant,
}

/// TTL cache over the per-tenant config objects. Entries are populated on
/// first miss and refetched once the TTL elapses; there is no explicit
/// eviction.
pub struct ConfigStore {
    client: StoreClient,
    cache: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ConfigStore {
    pub fn new(client: StoreClient, ttl_secs: u64) -> Self {
        Self {
            client,
            cache: Arc::new(DashMap::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// A missing object and a store failure are distinct failures: the
    /// former means the tenant was never provisioned (`NotConfigured`),
    /// the latter is retryable (`StoreUnavailable`). Callers must not
    /// collapse either into "no admins, no features".
    pub async fn get(&self, tenant: &str) -> Result<TenantConfig, AppError> {
        if let Some(entry) = self.cache.get(tenant) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.config.clone());
            }
        }

        let path = tenant_key(tenant, "config.json")?;
        let (bytes, _) = self
            .client
            .load(&path)
            .await?
            .ok_or_else(|| AppError::NotConfigured(format!("no config for tenant {}", tenant)))?;

        let config: TenantConfig = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::NotConfigured(format!("malformed config for tenant {}: {}", tenant, e))
        })?;

        self.cache.insert(
            tenant.to_string(),
            CacheEntry {
                config: config.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::path::Path;

    fn client() -> StoreClient {
        StoreClient::new(Arc::new(object_store::memory::InMemory::new()))
    }

    #[tokio::test]
    async fn missing_tenant_is_not_configured() {
        let store = ConfigStore::new(client(), 60);
        assert!(matches!(
            store.get("ghost").await,
            Err(AppError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn malformed_json_is_not_configured() {
        let c = client();
        c.save(&Path::from("tenants/acme/config.json"), b"{nope".to_vec(), None)
            .await
            .unwrap();
        let store = ConfigStore::new(c, 60);
        assert!(matches!(
            store.get("acme").await,
            Err(AppError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn loads_and_caches_config() {
        let c = client();
        let json = serde_json::json!({
            "adminEmails": ["ops@acme.io"],
            "approverEmails": ["chief@acme.io"],
            "features": {"charts": true},
            "name": "Acme Air",
        });
        c.save(
            &Path::from("tenants/acme/config.json"),
            serde_json::to_vec(&json).unwrap(),
            None,
        )
        .await
        .unwrap();

        let store = ConfigStore::new(c.clone(), 60);
        let cfg = store.get("acme").await.unwrap();
        assert_eq!(cfg.admin_emails, vec!["ops@acme.io"]);
        assert_eq!(cfg.features.get("charts"), Some(&true));
        assert_eq!(cfg.name.as_deref(), Some("Acme Air"));

        // served from cache even after the underlying object changes
        let path = Path::from("tenants/acme/config.json");
        let (_, version) = c.load(&path).await.unwrap().unwrap();
        c.save(&path, b"{}".to_vec(), Some(version)).await.unwrap();
        let cached = store.get("acme").await.unwrap();
        assert_eq!(cached.admin_emails, vec!["ops@acme.io"]);
    }
}
