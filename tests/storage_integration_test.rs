//! Storage behaviour shared by both backends
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests (needs DATABASE_URL)
//! - By default, SQLite is tested and PostgreSQL too when DATABASE_URL is set

use naano::leads::{fingerprint_window, visitor_fingerprint};
use naano::models::{
    generate_hash, now_ts, AttributionState, CompanyInference, EventType, LeadOutcome, LinkEvent,
    LinkToggles, NewLead, NewLinkEvent, NewTrackedLink, TrackedLink,
};
use naano::storage::{LeadFilter, PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;
use uuid::Uuid;

fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.eq_ignore_ascii_case(backend),
        Err(_) => true,
    }
}

async fn backends() -> Vec<(&'static str, Arc<dyn Storage>)> {
    let mut backends: Vec<(&'static str, Arc<dyn Storage>)> = Vec::new();

    if should_test_backend("sqlite") {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        backends.push(("sqlite", Arc::new(storage)));
    }

    if should_test_backend("postgres") {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if url.starts_with("postgres") {
                let storage = PostgresStorage::new(&url, 5).await.unwrap();
                storage.init().await.unwrap();
                backends.push(("postgres", Arc::new(storage)));
            }
        }
    }

    backends
}

/// Random hash so runs against a persistent Postgres do not collide
async fn new_link(storage: &dyn Storage) -> TrackedLink {
    storage
        .create_link(&NewTrackedLink {
            hash: generate_hash(12),
            destination_url: "https://acme.dev/pricing".to_string(),
            creator_id: "creator-1".to_string(),
            saas_id: format!("saas-{}", generate_hash(6)),
            collaboration_id: "collab-1".to_string(),
            cost_per_lead_cents: None,
            toggles: LinkToggles::default(),
        })
        .await
        .unwrap()
}

async fn click(storage: &dyn Storage, link: &TrackedLink, session_id: Uuid) -> LinkEvent {
    storage
        .insert_event(&NewLinkEvent {
            tracked_link_id: link.id,
            event_type: EventType::Click,
            session_id,
            ip_address: "81.2.69.142".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
            referrer: None,
            country: None,
            city: None,
            occurred_at: now_ts(),
        })
        .await
        .unwrap()
}

fn lead(link: &TrackedLink, session_id: &str, fingerprint: &str, window: i64) -> NewLead {
    NewLead {
        tracked_link_id: link.id,
        creator_id: link.creator_id.clone(),
        saas_id: link.saas_id.clone(),
        cost_per_lead_cents: 100,
        session_id: session_id.to_string(),
        visitor_fingerprint: fingerprint.to_string(),
        fingerprint_window: window,
        event_id: None,
        created_at: now_ts(),
    }
}

#[tokio::test]
async fn test_duplicate_hash_is_a_conflict() {
    for (name, storage) in backends().await {
        let link = new_link(storage.as_ref()).await;
        let again = NewTrackedLink {
            hash: link.hash.clone(),
            destination_url: "https://other.dev".to_string(),
            creator_id: "creator-2".to_string(),
            saas_id: "saas-2".to_string(),
            collaboration_id: "collab-2".to_string(),
            cost_per_lead_cents: None,
            toggles: LinkToggles::default(),
        };
        assert!(
            matches!(storage.create_link(&again).await, Err(StorageError::Conflict)),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_concurrent_lead_creation_is_idempotent() {
    for (name, storage) in backends().await {
        let link = new_link(storage.as_ref()).await;
        let session = Uuid::new_v4().to_string();
        let fingerprint = visitor_fingerprint("81.2.69.142", Some("Mozilla/5.0"));
        let window = fingerprint_window(now_ts());

        let mut handles = vec![];
        for _ in 0..16 {
            let storage = Arc::clone(&storage);
            let new_lead = lead(&link, &session, &fingerprint, window);
            handles.push(tokio::spawn(async move { storage.insert_lead(&new_lead).await }));
        }

        let mut outcomes = vec![];
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let created = outcomes.iter().filter(|o| o.is_created()).count();
        assert_eq!(created, 1, "{name}: exactly one insert wins");
        let id = outcomes[0].lead_id();
        assert!(outcomes.iter().all(|o| o.lead_id() == id), "{name}");
        assert_eq!(storage.count_leads(link.id).await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_fingerprint_window_dedups_across_sessions() {
    for (name, storage) in backends().await {
        let link = new_link(storage.as_ref()).await;
        let fingerprint = visitor_fingerprint("81.2.69.142", Some("Mozilla/5.0"));
        let window = fingerprint_window(now_ts());

        let first = storage
            .insert_lead(&lead(&link, &Uuid::new_v4().to_string(), &fingerprint, window))
            .await
            .unwrap();
        let second = storage
            .insert_lead(&lead(&link, &Uuid::new_v4().to_string(), &fingerprint, window))
            .await
            .unwrap();
        assert!(first.is_created(), "{name}");
        assert_eq!(second, LeadOutcome::Duplicate(first.lead_id()), "{name}");

        // Same visitor in a later window, with a new session, is a new lead
        let later = storage
            .insert_lead(&lead(&link, &Uuid::new_v4().to_string(), &fingerprint, window + 1))
            .await
            .unwrap();
        assert!(later.is_created(), "{name}");
        assert_eq!(storage.count_leads(link.id).await.unwrap(), 2, "{name}");
    }
}

#[tokio::test]
async fn test_time_on_site_is_write_once() {
    for (name, storage) in backends().await {
        let link = new_link(storage.as_ref()).await;
        let event = click(storage.as_ref(), &link, Uuid::new_v4()).await;

        assert!(storage.set_time_on_site(event.id, 7).await.unwrap(), "{name}");
        assert!(!storage.set_time_on_site(event.id, 90).await.unwrap(), "{name}");

        let stored = storage.get_event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.time_on_site_seconds, Some(7), "{name}");
    }
}

#[tokio::test]
async fn test_session_keeps_first_issuance() {
    for (name, storage) in backends().await {
        let id = Uuid::new_v4();
        let first = storage.touch_session(id, 1_000).await.unwrap();
        let again = storage.touch_session(id, 5_000).await.unwrap();

        assert_eq!(first.created_at, 1_000, "{name}");
        assert_eq!(again.created_at, 1_000, "{name}");
        assert_eq!(again.last_seen_at, 5_000, "{name}");
    }
}

#[tokio::test]
async fn test_attribution_compare_and_swap() {
    for (name, storage) in backends().await {
        let link = new_link(storage.as_ref()).await;
        let event = click(storage.as_ref(), &link, Uuid::new_v4()).await;
        let inference = CompanyInference::unknown(event.id, "test", now_ts());
        storage.insert_inference(&inference).await.unwrap();

        assert!(
            matches!(
                storage.insert_inference(&inference).await,
                Err(StorageError::Conflict)
            ),
            "{name}: one inference per event"
        );

        assert!(storage
            .transition_attribution(event.id, AttributionState::Inferred, AttributionState::Confirmed, 2_000)
            .await
            .unwrap());
        // A stale `from` loses
        assert!(!storage
            .transition_attribution(event.id, AttributionState::Inferred, AttributionState::Mismatch, 3_000)
            .await
            .unwrap());
        assert!(storage
            .transition_attribution(event.id, AttributionState::Confirmed, AttributionState::Disputed, 4_000)
            .await
            .unwrap());
        assert!(storage
            .transition_attribution(event.id, AttributionState::Disputed, AttributionState::Confirmed, 5_000)
            .await
            .unwrap());

        let stored = storage.get_inference(event.id).await.unwrap().unwrap();
        assert_eq!(stored.attribution_state, AttributionState::Confirmed, "{name}");
        assert_eq!(stored.confirmed_at, Some(2_000), "{name}: set once");
    }
}

#[tokio::test]
async fn test_lead_listing_keyset() {
    for (name, storage) in backends().await {
        let link = new_link(storage.as_ref()).await;
        // Same created_at, so the id breaks the tie
        for _ in 0..3 {
            let mut new_lead = lead(&link, &Uuid::new_v4().to_string(), &generate_hash(10), 0);
            new_lead.created_at = 1_000;
            storage.insert_lead(&new_lead).await.unwrap();
        }

        let filter = LeadFilter {
            saas_id: Some(link.saas_id.clone()),
            limit: 2,
            ..LeadFilter::default()
        };
        let page = storage.list_leads(&filter, now_ts()).await.unwrap();
        assert_eq!(page.len(), 2, "{name}");
        assert!(page[0].lead.id > page[1].lead.id, "{name}");

        let last = &page[1].lead;
        let next = LeadFilter {
            after: Some(naano::storage::LeadCursor {
                created_at: last.created_at,
                id: last.id,
            }),
            ..filter
        };
        let rest = storage.list_leads(&next, now_ts()).await.unwrap();
        assert_eq!(rest.len(), 1, "{name}");
        assert!(rest[0].lead.id < last.id, "{name}");
        assert!(!rest[0].qualified, "{name}: no click joined");
        assert_eq!(rest[0].effective_confidence, 0.0, "{name}");
    }
}
