//! Shared object-store plumbing.
//!
//! Per-tenant documents live as JSON objects under `tenants/<id>/`. The
//! backend is any `object_store` implementation, built from a URL:
//!
//! ```text
//! # S3
//! PILOTGATE_STORE_URL=s3://my-bucket?region=us-east-1
//!
//! # MinIO (self-hosted S3-compatible)
//! PILOTGATE_STORE_URL=s3://my-bucket?endpoint=http://minio:9000&region=us-east-1
//!
//! # Local filesystem (great for dev/testing)
//! PILOTGATE_STORE_URL=file:///var/lib/pilotgate
//!
//! # In-memory (tests)
//! PILOTGATE_STORE_URL=memory://
//! ```
//!
//! Whitelist writes rely on conditional puts (ETag match), so the S3
//! builder is configured for `ETagMatch` conditional-put support.

pub mod config;
pub mod whitelist;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, UpdateVersion};

use crate::errors::AppError;
use crate::tenant;

/// Upper bound on any single store round-trip. A slow store surfaces as
/// `StoreUnavailable`, never as "email not whitelisted".
const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build an object store from a URL. See module docs for supported schemes.
pub fn build_object_store(url: &str) -> Result<Arc<dyn ObjectStore>> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(object_store::memory::InMemory::new()));
    }

    if url.starts_with("file://") {
        let path = url.trim_start_matches("file://");
        let store = object_store::local::LocalFileSystem::new_with_prefix(path)
            .context("failed to create local file system object store")?;
        return Ok(Arc::new(store));
    }

    if url.starts_with("s3://") {
        let without_scheme = url.trim_start_matches("s3://");
        let bucket = without_scheme.split('?').next().unwrap_or(without_scheme);

        let endpoint = parse_query_param(url, "endpoint");
        let region = parse_query_param(url, "region").unwrap_or_else(|| "us-east-1".to_string());

        let mut builder = object_store::aws::AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(&region)
            .with_conditional_put(object_store::aws::S3ConditionalPut::ETagMatch);

        if let Some(ep) = endpoint {
            builder = builder.with_endpoint(&ep).with_allow_http(true);
        }

        // Credentials from env: AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
        // (or instance metadata / IAM role in production)
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
            if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                builder = builder.with_access_key_id(key).with_secret_access_key(secret);
            }
        }

        let store = builder.build().context("failed to build S3 object store")?;
        return Ok(Arc::new(store));
    }

    anyhow::bail!("unsupported PILOTGATE_STORE_URL scheme: {}", url)
}

fn parse_query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split('?').nth(1)?;
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

/// Storage key for a tenant-scoped document. Tenant ids are validated
/// here so a hostile id can never traverse into another tenant's keys.
pub fn tenant_key(tenant: &str, file: &str) -> Result<Path, AppError> {
    if !tenant::is_valid_tenant(tenant) {
        return Err(AppError::InvalidRequest(format!(
            "invalid tenant id: {}",
            tenant
        )));
    }
    Ok(Path::from(format!("tenants/{}/{}", tenant, file)))
}

/// Thin wrapper adding timeouts and the error mapping the rest of the
/// crate expects: `NotFound` → `None`, precondition failures → `Conflict`,
/// everything else → `StoreUnavailable`.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn ObjectStore>,
}

impl StoreClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Read an object and its concurrency token.
    pub async fn load(&self, path: &Path) -> Result<Option<(Vec<u8>, UpdateVersion)>, AppError> {
        let result = tokio::time::timeout(STORE_TIMEOUT, self.store.get(path))
            .await
            .map_err(|_| AppError::StoreUnavailable(format!("get {} timed out", path)))?;

        let get = match result {
            Ok(r) => r,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(AppError::StoreUnavailable(e.to_string())),
        };

        let version = UpdateVersion {
            e_tag: get.meta.e_tag.clone(),
            version: get.meta.version.clone(),
        };
        let bytes = tokio::time::timeout(STORE_TIMEOUT, get.bytes())
            .await
            .map_err(|_| AppError::StoreUnavailable(format!("read {} timed out", path)))?
            .map_err(|e| AppError::StoreUnavailable(e.to_string()))?;

        Ok(Some((bytes.to_vec(), version)))
    }

    /// Conditional write: `version = None` means create-if-absent, otherwise
    /// the put only succeeds if the object still matches `version`.
    pub async fn save(
        &self,
        path: &Path,
        bytes: Vec<u8>,
        version: Option<UpdateVersion>,
    ) -> Result<(), AppError> {
        let mode = match version {
            Some(v) => PutMode::Update(v),
            None => PutMode::Create,
        };
        let opts = PutOptions {
            mode,
            ..Default::default()
        };

        let result = tokio::time::timeout(
            STORE_TIMEOUT,
            self.store.put_opts(path, bytes.into(), opts),
        )
        .await
        .map_err(|_| AppError::StoreUnavailable(format!("put {} timed out", path)))?;

        match result {
            Ok(_) => Ok(()),
            // Lost the race: someone created or updated the object first.
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::AlreadyExists { .. }) => Err(AppError::Conflict),
            Err(object_store::Error::NotFound { .. }) => Err(AppError::Conflict),
            Err(e) => Err(AppError::StoreUnavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_keys_reject_traversal() {
        assert!(tenant_key("acme", "config.json").is_ok());
        assert!(tenant_key("../secrets", "config.json").is_err());
        assert!(tenant_key("a/b", "config.json").is_err());
        assert!(tenant_key("", "config.json").is_err());
    }

    #[tokio::test]
    async fn conditional_save_detects_races() {
        let client = StoreClient::new(Arc::new(object_store::memory::InMemory::new()));
        let path = Path::from("tenants/acme/whitelist.json");

        client.save(&path, b"v1".to_vec(), None).await.unwrap();
        // second create must fail
        assert!(matches!(
            client.save(&path, b"v2".to_vec(), None).await,
            Err(AppError::Conflict)
        ));

        let (bytes, version) = client.load(&path).await.unwrap().unwrap();
        assert_eq!(bytes, b"v1");

        // stale-version update must fail after an intervening write
        client
            .save(&path, b"v2".to_vec(), Some(version.clone()))
            .await
            .unwrap();
        assert!(matches!(
            client.save(&path, b"v3".to_vec(), Some(version)).await,
            Err(AppError::Conflict)
        ));
    }
}
