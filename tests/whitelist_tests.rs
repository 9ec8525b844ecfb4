//! Whitelist state-machine and optimistic-concurrency tests against an
//! in-memory object store.

use std::sync::Arc;

use pilotgate::store::whitelist::WhitelistStore;
use pilotgate::store::StoreClient;

fn store() -> WhitelistStore {
    WhitelistStore::new(StoreClient::new(Arc::new(
        object_store::memory::InMemory::new(),
    )))
}

#[tokio::test]
async fn add_makes_email_whitelisted() {
    let wl = store();
    wl.add("acme", "Pilot@Example.com ").await.unwrap();
    assert!(wl.is_whitelisted("acme", "pilot@example.com").await.unwrap());
    assert!(!wl.is_whitelisted("acme", "other@example.com").await.unwrap());
}

#[tokio::test]
async fn tenants_are_isolated() {
    let wl = store();
    wl.add("acme", "pilot@example.com").await.unwrap();
    assert!(!wl.is_whitelisted("skyco", "pilot@example.com").await.unwrap());
}

#[tokio::test]
async fn pending_request_lifecycle() {
    let wl = store();

    let first = wl.add_pending_request("acme", "x@y.com").await.unwrap();
    assert!(first.added);
    assert!(!first.already_pending);

    // second call is a no-op, still exactly one entry
    let second = wl.add_pending_request("acme", "x@y.com").await.unwrap();
    assert!(!second.added);
    assert!(second.already_pending);

    let doc = wl.document("acme").await.unwrap();
    assert_eq!(doc.pending.len(), 1);
    assert_eq!(doc.pending[0].email, "x@y.com");
    assert!(doc.emails.is_empty());
}

#[tokio::test]
async fn pending_request_rejected_when_already_whitelisted() {
    let wl = store();
    wl.add("acme", "x@y.com").await.unwrap();
    let outcome = wl.add_pending_request("acme", "x@y.com").await.unwrap();
    assert!(!outcome.added);
    assert!(!outcome.already_pending);
}

#[tokio::test]
async fn approve_moves_pending_to_whitelist() {
    let wl = store();
    wl.add_pending_request("acme", "x@y.com").await.unwrap();

    let doc = wl.approve("acme", "x@y.com").await.unwrap();
    assert!(doc.contains("x@y.com"));
    assert!(!doc.is_pending("x@y.com"));
}

#[tokio::test]
async fn deny_returns_email_to_unknown() {
    let wl = store();
    wl.add_pending_request("acme", "x@y.com").await.unwrap();

    let doc = wl.deny("acme", "x@y.com").await.unwrap();
    assert!(!doc.contains("x@y.com"));
    assert!(!doc.is_pending("x@y.com"));
}

#[tokio::test]
async fn remove_revokes_whitelisting() {
    let wl = store();
    wl.add("acme", "x@y.com").await.unwrap();
    let doc = wl.remove("acme", "x@y.com").await.unwrap();
    assert!(!doc.contains("x@y.com"));
}

#[tokio::test]
async fn pending_queue_preserves_insertion_order() {
    let wl = store();
    for email in ["a@y.com", "b@y.com", "c@y.com"] {
        wl.add_pending_request("acme", email).await.unwrap();
    }
    let doc = wl.document("acme").await.unwrap();
    let order: Vec<&str> = doc.pending.iter().map(|p| p.email.as_str()).collect();
    assert_eq!(order, vec!["a@y.com", "b@y.com", "c@y.com"]);
}

#[tokio::test]
async fn concurrent_approvals_lose_no_update() {
    // Two admins approve different pending emails at the same time against
    // the same starting document. Neither approval may be dropped.
    let client = StoreClient::new(Arc::new(object_store::memory::InMemory::new()));
    let wl = Arc::new(WhitelistStore::new(client));
    wl.add_pending_request("acme", "a@y.com").await.unwrap();
    wl.add_pending_request("acme", "b@y.com").await.unwrap();

    let (ra, rb) = tokio::join!(wl.approve("acme", "a@y.com"), wl.approve("acme", "b@y.com"));
    ra.unwrap();
    rb.unwrap();

    let doc = wl.document("acme").await.unwrap();
    assert!(doc.contains("a@y.com"));
    assert!(doc.contains("b@y.com"));
    assert!(doc.pending.is_empty());
}

#[tokio::test]
async fn concurrent_approvals_of_same_email_converge() {
    let client = StoreClient::new(Arc::new(object_store::memory::InMemory::new()));
    let wl = Arc::new(WhitelistStore::new(client));
    wl.add_pending_request("acme", "x@y.com").await.unwrap();

    let (ra, rb) = tokio::join!(wl.approve("acme", "x@y.com"), wl.approve("acme", "x@y.com"));
    ra.unwrap();
    rb.unwrap();

    let doc = wl.document("acme").await.unwrap();
    assert_eq!(doc.emails, vec!["x@y.com"]);
    assert!(doc.pending.is_empty());
}

#[tokio::test]
async fn invalid_tenant_id_never_reaches_the_store() {
    let wl = store();
    assert!(wl.add("../other", "x@y.com").await.is_err());
    assert!(wl.is_whitelisted("UPPER", "x@y.com").await.is_err());
}
