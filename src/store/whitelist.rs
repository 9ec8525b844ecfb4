//! Per-tenant access state: the whitelist and the pending queue.
//!
//! One JSON object per tenant. Every mutation is a full read-modify-write
//! conditioned on the object's version token, retried a bounded number of
//! times on conflict — never last-write-wins, so two admins approving
//! different emails concurrently cannot drop each other's change.
//!
//! Per-email state machine: Unknown → Pending (request) → Whitelisted
//! (approve) or Unknown (deny); Whitelisted → Unknown (remove); an admin
//! `add` jumps straight to Whitelisted from either state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::store::{tenant_key, StoreClient};

const WRITE_RETRIES: usize = 3;

/// How long `is_whitelisted` may serve a stale copy. Sign-in reads are
/// latency-sensitive; mutations always re-read fresh.
const READ_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub email: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistDocument {
    /// Unique, lowercased, trimmed.
    #[serde(default)]
    pub emails: Vec<String>,
    /// Insertion order, oldest first, so approvers review deterministically.
    #[serde(default)]
    pub pending: Vec<PendingEntry>,
}

impl WhitelistDocument {
    pub fn contains(&self, email: &str) -> bool {
        self.emails.iter().any(|e| e == email)
    }

    pub fn is_pending(&self, email: &str) -> bool {
        self.pending.iter().any(|p| p.email == email)
    }

    /// Whitelist the email, dropping any pending entry. Returns false if
    /// nothing changed.
    fn add(&mut self, email: &str) -> bool {
        let dropped = self.drop_pending(email);
        if self.contains(email) {
            return dropped;
        }
        self.emails.push(email.to_string());
        true
    }

    fn remove(&mut self, email: &str) -> bool {
        let before = self.emails.len();
        self.emails.retain(|e| e != email);
        self.emails.len() != before
    }

    fn deny(&mut self, email: &str) -> bool {
        self.drop_pending(email)
    }

    fn drop_pending(&mut self, email: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|p| p.email != email);
        self.pending.len() != before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOutcome {
    /// True when the email was newly enqueued (approvers should be notified).
    pub added: bool,
    pub already_pending: bool,
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub struct WhitelistStore {
    client: StoreClient,
    read_cache: Arc<DashMap<String, (WhitelistDocument, Instant)>>,
}

impl WhitelistStore {
    pub fn new(client: StoreClient) -> Self {
        Self {
            client,
            read_cache: Arc::new(DashMap::new()),
        }
    }

    /// Unauthenticated sign-in check. May serve a copy up to
    /// `READ_CACHE_TTL` stale.
    pub async fn is_whitelisted(&self, tenant: &str, email: &str) -> Result<bool, AppError> {
        let email = normalize_email(email);
        if let Some(cached) = self.read_cache.get(tenant) {
            let (doc, at) = &*cached;
            if at.elapsed() < READ_CACHE_TTL {
                return Ok(doc.contains(&email));
            }
        }
        let (doc, _) = self.load_fresh(tenant).await?;
        let hit = doc.contains(&email);
        self.read_cache
            .insert(tenant.to_string(), (doc, Instant::now()));
        Ok(hit)
    }

    /// Fresh read of the full document (admin views).
    pub async fn document(&self, tenant: &str) -> Result<WhitelistDocument, AppError> {
        Ok(self.load_fresh(tenant).await?.0)
    }

    /// Unknown → Pending. No-op if already pending; rejected (added=false)
    /// if already whitelisted.
    pub async fn add_pending_request(
        &self,
        tenant: &str,
        email: &str,
    ) -> Result<PendingOutcome, AppError> {
        let email = normalize_email(email);
        for _ in 0..WRITE_RETRIES {
            let (mut doc, version) = self.load_fresh(tenant).await?;
            if doc.contains(&email) {
                return Ok(PendingOutcome {
                    added: false,
                    already_pending: false,
                });
            }
            if doc.is_pending(&email) {
                return Ok(PendingOutcome {
                    added: false,
                    already_pending: true,
                });
            }
            doc.pending.push(PendingEntry {
                email: email.clone(),
                requested_at: Utc::now(),
            });
            match self.write(tenant, &doc, version).await {
                Ok(()) => {
                    return Ok(PendingOutcome {
                        added: true,
                        already_pending: false,
                    })
                }
                Err(AppError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict)
    }

    /// Admin add: Unknown or Pending → Whitelisted.
    pub async fn add(&self, tenant: &str, email: &str) -> Result<WhitelistDocument, AppError> {
        self.mutate(tenant, &normalize_email(email), WhitelistDocument::add)
            .await
    }

    /// Whitelisted → Unknown.
    pub async fn remove(&self, tenant: &str, email: &str) -> Result<WhitelistDocument, AppError> {
        self.mutate(tenant, &normalize_email(email), WhitelistDocument::remove)
            .await
    }

    /// Pending → Whitelisted. Same transition as `add`; the email lands in
    /// `emails` and leaves `pending` in one write, never both at once.
    pub async fn approve(&self, tenant: &str, email: &str) -> Result<WhitelistDocument, AppError> {
        self.mutate(tenant, &normalize_email(email), WhitelistDocument::add)
            .await
    }

    /// Pending → Unknown.
    pub async fn deny(&self, tenant: &str, email: &str) -> Result<WhitelistDocument, AppError> {
        self.mutate(tenant, &normalize_email(email), WhitelistDocument::deny)
            .await
    }

    async fn mutate(
        &self,
        tenant: &str,
        email: &str,
        transition: fn(&mut WhitelistDocument, &str) -> bool,
    ) -> Result<WhitelistDocument, AppError> {
        for _ in 0..WRITE_RETRIES {
            let (mut doc, version) = self.load_fresh(tenant).await?;
            if !transition(&mut doc, email) {
                // Already in the target state, nothing to persist.
                return Ok(doc);
            }
            match self.write(tenant, &doc, version).await {
                Ok(()) => return Ok(doc),
                Err(AppError::Conflict) => continue,
                Err(e) => return Err(e),
            }
        }
        tracing::warn!(tenant, email, "whitelist write lost {} races", WRITE_RETRIES);
        Err(AppError::Conflict)
    }

    async fn load_fresh(
        &self,
        tenant: &str,
    ) -> Result<(WhitelistDocument, Option<object_store::UpdateVersion>), AppError> {
        let path = tenant_key(tenant, "whitelist.json")?;
        match self.client.load(&path).await? {
            Some((bytes, version)) => {
                let doc = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::StoreUnavailable(format!(
                        "malformed whitelist for tenant {}: {}",
                        tenant, e
                    ))
                })?;
                Ok((doc, Some(version)))
            }
            // Absent object reads as the empty document; the first write
            // uses create-if-absent so a concurrent bootstrap still races
            // safely.
            None => Ok((WhitelistDocument::default(), None)),
        }
    }

    async fn write(
        &self,
        tenant: &str,
        doc: &WhitelistDocument,
        version: Option<object_store::UpdateVersion>,
    ) -> Result<(), AppError> {
        let path = tenant_key(tenant, "whitelist.json")?;
        let bytes = serde_json::to_vec(doc)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("whitelist encode: {}", e)))?;
        self.client.save(&path, bytes, version).await?;
        self.read_cache.remove(tenant);
        Ok(())
    }
}
