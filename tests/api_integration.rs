//! Internal API integration tests

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::*;
use naano::models::{
    now_ts, AttributionState, CompanyInference, EventType, IntentSignals, LinkEvent, LinkToggles,
    NetworkType, NewIntentScore, NewLead, NewLinkEvent, TrackedLink,
};
use naano::storage::Storage;
use tower::ServiceExt;
use uuid::Uuid;

const DAY: i64 = 86_400;

async fn insert_event(storage: &dyn Storage, link: &TrackedLink, session_id: Uuid, ip: &str) -> LinkEvent {
    storage
        .insert_event(&NewLinkEvent {
            tracked_link_id: link.id,
            event_type: EventType::Click,
            session_id,
            ip_address: ip.to_string(),
            user_agent: Some(BROWSER_UA.to_string()),
            referrer: None,
            country: None,
            city: None,
            occurred_at: now_ts(),
        })
        .await
        .unwrap()
}

fn inference(event_id: i64, company: &str, confidence: f64, created_at: i64) -> CompanyInference {
    CompanyInference {
        event_id,
        inferred_company_name: Some(company.to_string()),
        domain: Some("acme.dev".to_string()),
        industry: None,
        size: None,
        location: Some("Berlin, DE".to_string()),
        confidence_score: confidence,
        confidence_reasons: vec!["legal suffix".to_string()],
        network_type: NetworkType::Corporate,
        asn_organization: Some(company.to_string()),
        is_ambiguous: false,
        attribution_state: AttributionState::Inferred,
        created_at,
        confirmed_at: None,
    }
}

async fn insert_lead(storage: &dyn Storage, link: &TrackedLink, saas_id: &str, event: &LinkEvent, created_at: i64) {
    storage
        .insert_lead(&NewLead {
            tracked_link_id: link.id,
            creator_id: link.creator_id.clone(),
            saas_id: saas_id.to_string(),
            cost_per_lead_cents: 250,
            session_id: event.session_id.to_string(),
            visitor_fingerprint: format!("fp-{}", event.id),
            fingerprint_window: created_at / 600,
            event_id: Some(event.id),
            created_at,
        })
        .await
        .unwrap();
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_leads_page_with_signed_cursor() {
    let app = TestApp::new().await;
    let link = create_link(app.storage.as_ref(), "leads", "https://acme.dev/", LinkToggles::default()).await;

    for (i, created_at) in [1_000, 2_000, 3_000].into_iter().enumerate() {
        let event = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), &format!("81.2.69.{i}")).await;
        insert_lead(app.storage.as_ref(), &link, "saas-1", &event, created_at).await;
    }
    let other = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), "81.2.69.99").await;
    insert_lead(app.storage.as_ref(), &link, "saas-2", &other, 4_000).await;

    let response = app
        .api
        .clone()
        .oneshot(get("/internal/leads?saas_id=saas-1&limit=2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    let leads = page["leads"].as_array().unwrap();
    assert_eq!(leads.len(), 2);
    assert_eq!(leads[0]["lead"]["created_at"], 3_000);
    assert_eq!(leads[1]["lead"]["created_at"], 2_000);
    let cursor = page["next_cursor"].as_str().unwrap().to_string();

    let response = app
        .api
        .clone()
        .oneshot(get(&format!("/internal/leads?saas_id=saas-1&limit=2&cursor={cursor}")))
        .await
        .unwrap();
    let page = body_json(response).await;
    let leads = page["leads"].as_array().unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["lead"]["created_at"], 1_000);
    assert!(page["next_cursor"].is_null());
}

#[tokio::test]
async fn test_forged_cursor_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .api
        .clone()
        .oneshot(get("/internal/leads?cursor=eyJjIjoxLCJpIjoxfQ.AAAA"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_min_confidence_uses_decayed_confidence() {
    let app = TestApp::new().await;
    let link = create_link(app.storage.as_ref(), "decay", "https://acme.dev/", LinkToggles::default()).await;
    let now = now_ts();

    // 0.8 stored a hundred days ago is worth 0.7 today
    let old = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), "81.2.69.10").await;
    app.storage
        .insert_inference(&inference(old.id, "Acme GmbH", 0.8, now - 100 * DAY))
        .await
        .unwrap();
    insert_lead(app.storage.as_ref(), &link, "saas-1", &old, now - 100 * DAY).await;

    // Confirmed attributions count as certain
    let confirmed = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), "81.2.69.11").await;
    app.storage
        .insert_inference(&inference(confirmed.id, "Globex Inc", 0.4, now - 300 * DAY))
        .await
        .unwrap();
    app.storage
        .transition_attribution(confirmed.id, AttributionState::Inferred, AttributionState::Confirmed, now)
        .await
        .unwrap();
    insert_lead(app.storage.as_ref(), &link, "saas-1", &confirmed, now - 50 * DAY).await;

    let companies = |page: serde_json::Value| -> Vec<String> {
        page["leads"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["company_name"].as_str().unwrap().to_string())
            .collect()
    };

    let response = app
        .api
        .clone()
        .oneshot(get("/internal/leads?min_confidence=0.75"))
        .await
        .unwrap();
    assert_eq!(companies(body_json(response).await), vec!["Globex Inc"]);

    let response = app
        .api
        .clone()
        .oneshot(get("/internal/leads?min_confidence=0.65"))
        .await
        .unwrap();
    let page = body_json(response).await;
    assert_eq!(companies(page.clone()), vec!["Globex Inc", "Acme GmbH"]);
    let effective = page["leads"][1]["effective_confidence"].as_f64().unwrap();
    assert!((effective - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_attribution_state_machine() {
    let app = TestApp::new().await;
    let link = create_link(app.storage.as_ref(), "review", "https://acme.dev/", LinkToggles::default()).await;
    let event = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), "81.2.69.20").await;
    app.storage
        .insert_inference(&inference(event.id, "Acme GmbH", 0.7, now_ts()))
        .await
        .unwrap();
    let uri = format!("/internal/events/{}/attribution", event.id);

    let response = app
        .api
        .clone()
        .oneshot(json_request("PUT", &uri, serde_json::json!({ "state": "confirmed" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["attribution_state"], "confirmed");
    assert!(body["confirmed_at"].is_i64());

    let response = app
        .api
        .clone()
        .oneshot(json_request("PUT", &uri, serde_json::json!({ "state": "mismatch" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .api
        .clone()
        .oneshot(json_request("PUT", &uri, serde_json::json!({ "state": "disputed" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["attribution_state"], "disputed");

    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "PUT",
            "/internal/events/987654/attribution",
            serde_json::json!({ "state": "confirmed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_company_intent_excludes_mismatches() {
    let app = TestApp::new().await;
    let link = create_link(app.storage.as_ref(), "intent", "https://acme.dev/pricing", LinkToggles::default()).await;
    let now = now_ts();

    for (i, (score, state)) in [
        (80, AttributionState::Inferred),
        (40, AttributionState::Inferred),
        (100, AttributionState::Mismatch),
    ]
    .into_iter()
    .enumerate()
    {
        let session = Uuid::new_v4();
        let event = insert_event(app.storage.as_ref(), &link, session, &format!("81.2.69.{}", 30 + i)).await;
        app.storage
            .insert_inference(&inference(event.id, "Acme GmbH", 0.9, now))
            .await
            .unwrap();
        if state == AttributionState::Mismatch {
            app.storage
                .transition_attribution(event.id, AttributionState::Inferred, state, now)
                .await
                .unwrap();
        }
        app.storage
            .insert_intent_score(&NewIntentScore {
                event_id: event.id,
                session_id: session,
                score,
                is_repeat_visit: false,
                visit_count: 1,
                viewed_pricing: true,
                viewed_security: false,
                viewed_integrations: false,
                signals: IntentSignals::default(),
                recency_weight: 1.0,
                created_at: now,
            })
            .await
            .unwrap();
    }

    let response = app
        .api
        .clone()
        .oneshot(get("/internal/companies/Acme%20GmbH/intent"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let intent = body_json(response).await;
    assert_eq!(intent["company_name"], "Acme GmbH");
    assert_eq!(intent["max_score"], 80);
    assert_eq!(intent["session_count"], 2);
    assert_eq!(intent["avg_score"], 60.0);

    let response = app
        .api
        .clone()
        .oneshot(get("/internal/companies/Initech/intent"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_enrich_request_is_queued() {
    let app = TestApp::new().await;
    let link = create_link(app.storage.as_ref(), "enrich", "https://acme.dev/", LinkToggles::default()).await;
    let event = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), "10.1.2.3").await;

    let response = app
        .api
        .clone()
        .oneshot(json_request("POST", "/internal/enrich", serde_json::json!({ "eventID": 424242 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .api
        .clone()
        .oneshot(json_request("POST", "/internal/enrich", serde_json::json!({ "eventID": event.id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["queued"], true);

    let (storage, _) = app.drain().await;
    let inference = storage.get_inference(event.id).await.unwrap().unwrap();
    assert_eq!(inference.network_type, NetworkType::Unknown);
    assert!(inference.is_ambiguous);
    // Enrichment alone never creates a lead
    assert_eq!(storage.count_leads(link.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_engagement_is_also_served_internally() {
    let app = TestApp::new().await;
    let link = create_link(app.storage.as_ref(), "inner", "https://acme.dev/", LinkToggles::default()).await;
    let event = insert_event(app.storage.as_ref(), &link, Uuid::new_v4(), "81.2.69.50").await;

    let response = app
        .api
        .clone()
        .oneshot(json_request(
            "POST",
            "/internal/confirm-engagement",
            serde_json::json!({ "eventID": event.id, "timeOnSiteSeconds": 12 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["updated"], true);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let response = app.api.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
