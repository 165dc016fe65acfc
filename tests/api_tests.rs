use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use bounty_watch::api::{router, AppState};
use bounty_watch::model::{DomainInfo, DomainStatus, Program, ProgramType};
use bounty_watch::store::{MemoryStore, Store};

async fn seeded() -> (Router, Arc<MemoryStore>, i64) {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc::now() - Duration::minutes(10);
    for (handle, kind, bounties) in [("acme", ProgramType::Rdp, true), ("globex", ProgramType::Vdp, false)] {
        store
            .upsert_program(&Program {
                handle: handle.into(),
                name: handle.to_uppercase(),
                url: format!("https://hackerone.com/{}", handle),
                primary_domain: None,
                offers_bounties: bounties,
                program_type: kind,
                last_scanned: t0,
            })
            .await
            .unwrap();
    }
    store.record_observation("a.acme.com", "acme", DomainStatus::Down, t0).await.unwrap();
    store.record_observation("b.acme.com", "acme", DomainStatus::Up, t0).await.unwrap();
    store.record_observation("globex.io", "globex", DomainStatus::Up, t0).await.unwrap();
    let change = store
        .record_observation("a.acme.com", "acme", DomainStatus::Up, t0 + Duration::minutes(1))
        .await
        .unwrap()
        .transition
        .unwrap();

    let app = router(AppState { store: store.clone() });
    (app, store, change.id)
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn stats_report_counts() {
    let (app, _, _) = seeded().await;
    let (status, body) = call(&app, "GET", "/api/v1/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_domains"], 3);
    assert_eq!(body["new_domains"], 2);
    assert_eq!(body["up_domains"], 3);
    assert_eq!(body["down_domains"], 0);
    assert_eq!(body["total_programs"], 2);
}

#[tokio::test]
async fn domain_listings() {
    let (app, _, _) = seeded().await;

    let (_, new) = call(&app, "GET", "/api/v1/domains/new?limit=1").await;
    assert_eq!(new.as_array().unwrap().len(), 1);

    let (_, by_program) = call(&app, "GET", "/api/v1/domains/program/acme").await;
    assert_eq!(by_program.as_array().unwrap().len(), 2);

    let (_, filtered) = call(&app, "GET", "/api/v1/domains?program=globex").await;
    let filtered = filtered.as_array().unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0]["name"], "globex.io");
    assert_eq!(filtered[0]["status"], "up");
}

#[tokio::test]
async fn program_listings_filter_by_type_and_bounties() {
    let (app, _, _) = seeded().await;
    let (_, rdp) = call(&app, "GET", "/api/v1/programs/rdp").await;
    assert_eq!(rdp[0]["handle"], "acme");
    assert_eq!(rdp[0]["program_type"], "RDP");
    let (_, vdp) = call(&app, "GET", "/api/v1/programs/vdp").await;
    assert_eq!(vdp.as_array().unwrap().len(), 1);
    let (_, bounties) = call(&app, "GET", "/api/v1/programs/bounties").await;
    assert_eq!(bounties.as_array().unwrap().len(), 1);
    let (_, all) = call(&app, "GET", "/api/v1/programs").await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn acknowledging_a_change() {
    let (app, _, id) = seeded().await;

    let (_, pending) = call(&app, "GET", "/api/v1/status-changes/unnotified").await;
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["old_status"], "down");

    let uri = format!("/api/v1/status-changes/{}/notified", id);
    let (status, body) = call(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notified"], true);
    let (again, _) = call(&app, "POST", &uri).await;
    assert_eq!(again, StatusCode::OK);

    let (_, pending) = call(&app, "GET", "/api/v1/status-changes?unnotified=true").await;
    assert!(pending.as_array().unwrap().is_empty());
    let (_, all) = call(&app, "GET", "/api/v1/status-changes").await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_change_id_is_a_json_404() {
    let (app, _, _) = seeded().await;
    let (status, body) = call(&app, "POST", "/api/v1/status-changes/9999/notified").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["status"], 404);
    assert!(body["error"]["message"].as_str().unwrap().contains("9999"));
}

#[tokio::test]
async fn domain_info_lookup() {
    let (app, store, _) = seeded().await;
    let (missing, _) = call(&app, "GET", "/api/v1/domains/program/acme/b.acme.com/info").await;
    assert_eq!(missing, StatusCode::NOT_FOUND);

    store
        .save_domain_info(&DomainInfo {
            domain: "b.acme.com".into(),
            program: "acme".into(),
            status: DomainStatus::Up,
            status_code: Some(200),
            title: Some("Acme Shop".into()),
            technologies: vec!["nginx".into()],
            server: Some("nginx".into()),
            content_type: None,
            content_length: None,
            last_checked: Utc::now(),
        })
        .await
        .unwrap();

    let (status, info) = call(&app, "GET", "/api/v1/domains/program/acme/b.acme.com/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["title"], "Acme Shop");
    assert_eq!(info["status_code"], 200);
}

#[tokio::test]
async fn malformed_query_uses_the_error_envelope() {
    let (app, _, _) = seeded().await;
    for uri in ["/api/v1/domains/new?limit=abc", "/api/v1/status-changes?unnotified=maybe"] {
        let (status, body) = call(&app, "GET", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["status"], 400, "{uri}");
        assert!(body["error"]["message"].as_str().is_some_and(|m| !m.is_empty()), "{uri}");
    }
}
