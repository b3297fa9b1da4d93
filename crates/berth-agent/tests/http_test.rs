// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the HTTP control surface, driven through the router.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use berth_agent::http::router;
use berth_agent::lifecycle::MockLifecycleManager;
use berth_agent::model::Installation;
use berth_agent::version::{AGENT_VERSION_HEADER, SLOT_VERSION_HEADER};
use common::TestContext;

async fn app(ctx: &TestContext) -> Router {
    router(Arc::new(ctx.agent().await))
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Body,
) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    app.clone().oneshot(request.body(body).unwrap()).await.unwrap()
}

fn json_body(installation: &Installation) -> Body {
    Body::from(serde_json::to_vec(installation).unwrap())
}

async fn read_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn header_str(response: &Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn install(app: &Router, installation: &Installation) -> Response {
    send(
        app,
        Method::POST,
        "/v1/agent/slot",
        &[(header::CONTENT_TYPE.as_str(), "application/json")],
        json_body(installation),
    )
    .await
}

#[tokio::test]
async fn test_get_agent_status() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;

    let response = send(&app, Method::GET, "/v1/agent", &[], Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let version = header_str(&response, AGENT_VERSION_HEADER);
    let body = read_json(response).await;
    assert_eq!(body["state"], "ONLINE");
    assert_eq!(body["location"], "/test/host");
    assert_eq!(body["version"], version);
}

#[tokio::test]
async fn test_install_returns_created_with_location() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;

    let response = install(&app, &ctx.artifacts.installation("apple", "1.0")).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = header_str(&response, header::LOCATION.as_str());
    let slot_version = header_str(&response, SLOT_VERSION_HEADER);
    assert!(response.headers().contains_key(AGENT_VERSION_HEADER));

    let body = read_json(response).await;
    assert_eq!(body["state"], "STOPPED");
    assert_eq!(body["location"], "/test/host/apple");
    assert_eq!(body["externalUri"], location);
    assert_eq!(body["version"], slot_version);
    assert!(location.starts_with("http://agent.example.com/v1/agent/slot/"));

    let listed = send(&app, Method::GET, "/v1/agent/slot", &[], Body::empty()).await;
    assert_eq!(listed.status(), StatusCode::OK);
    let slots = read_json(listed).await;
    assert_eq!(slots.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_lifecycle_verbs() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;
    let created = read_json(install(&app, &ctx.artifacts.installation("apple", "1.0")).await).await;
    let uri = format!("/v1/agent/slot/{}/lifecycle", created["id"].as_str().unwrap());

    let running = send(&app, Method::PUT, &uri, &[], Body::from("running")).await;
    assert_eq!(running.status(), StatusCode::OK);
    assert_eq!(read_json(running).await["state"], "RUNNING");

    let restarted = send(&app, Method::PUT, &uri, &[], Body::from("RESTARTING")).await;
    assert_eq!(read_json(restarted).await["state"], "RUNNING");

    let killed = send(&app, Method::PUT, &uri, &[], Body::from("killing\n")).await;
    assert_eq!(read_json(killed).await["state"], "STOPPED");

    let bad = send(&app, Method::PUT, &uri, &[], Body::from("terminated")).await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(bad).await["error"], "bad_request");
}

#[tokio::test]
async fn test_stale_slot_version_is_rejected() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;
    let created = install(&app, &ctx.artifacts.installation("apple", "1.0")).await;
    let stale = header_str(&created, SLOT_VERSION_HEADER);
    let id = read_json(created).await["id"].as_str().unwrap().to_string();
    let lifecycle = format!("/v1/agent/slot/{id}/lifecycle");

    // Another client starts the slot, changing its version.
    let started = send(&app, Method::PUT, &lifecycle, &[], Body::from("running")).await;
    let current = header_str(&started, SLOT_VERSION_HEADER);
    assert_ne!(current, stale);

    let response = send(
        &app,
        Method::PUT,
        &format!("/v1/agent/slot/{id}/assignment"),
        &[
            (header::CONTENT_TYPE.as_str(), "application/json"),
            (SLOT_VERSION_HEADER, stale.as_str()),
        ],
        json_body(&ctx.artifacts.installation("apple", "2.0")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(header_str(&response, SLOT_VERSION_HEADER), current);
    let body = read_json(response).await;
    assert_eq!(body["error"], "version_conflict");
    assert_eq!(body["expected"], stale);
    assert_eq!(body["actual"], current);

    // Nothing was applied.
    let status = read_json(
        send(&app, Method::GET, &format!("/v1/agent/slot/{id}"), &[], Body::empty()).await,
    )
    .await;
    assert_eq!(status["assignment"]["binary"], "food.fruit:apple:1.0");
    assert_eq!(status["state"], "RUNNING");
}

#[tokio::test]
async fn test_current_versions_are_accepted() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;
    let created = install(&app, &ctx.artifacts.installation("apple", "1.0")).await;
    let slot_version = header_str(&created, SLOT_VERSION_HEADER);
    let agent_version = header_str(&created, AGENT_VERSION_HEADER);
    let id = read_json(created).await["id"].as_str().unwrap().to_string();

    let response = send(
        &app,
        Method::PUT,
        &format!("/v1/agent/slot/{id}/assignment"),
        &[
            (header::CONTENT_TYPE.as_str(), "application/json"),
            (SLOT_VERSION_HEADER, slot_version.as_str()),
            (AGENT_VERSION_HEADER, agent_version.as_str()),
        ],
        json_body(&ctx.artifacts.installation("apple", "2.0")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["assignment"]["binary"], "food.fruit:apple:2.0");
    assert_eq!(body["state"], "STOPPED");
}

#[tokio::test]
async fn test_stale_agent_version_blocks_install() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;

    let response = install(&app, &ctx.artifacts.installation("apple", "1.0")).await;
    let stale = header_str(&response, AGENT_VERSION_HEADER);
    install(&app, &ctx.artifacts.installation("banana", "1.0")).await;

    let rejected = send(
        &app,
        Method::POST,
        "/v1/agent/slot",
        &[
            (header::CONTENT_TYPE.as_str(), "application/json"),
            (AGENT_VERSION_HEADER, stale.as_str()),
        ],
        json_body(&ctx.artifacts.installation("cherry", "1.0")),
    )
    .await;
    assert_eq!(rejected.status(), StatusCode::CONFLICT);
    assert!(!ctx.slots_dir().join("cherry").exists());
}

#[tokio::test]
async fn test_unknown_slots_are_not_found() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;
    let id = uuid::Uuid::new_v4();

    for (method, uri, body) in [
        (Method::GET, format!("/v1/agent/slot/{id}"), Body::empty()),
        (Method::DELETE, format!("/v1/agent/slot/{id}"), Body::empty()),
        (
            Method::PUT,
            format!("/v1/agent/slot/{id}/lifecycle"),
            Body::from("running"),
        ),
        (Method::GET, "/v1/agent/slot/not-a-uuid".to_string(), Body::empty()),
    ] {
        let response = send(&app, method, &uri, &[], body).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(read_json(response).await["error"], "not_found");
    }
}

#[tokio::test]
async fn test_lifecycle_on_terminated_slot_is_gone() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;
    let created = read_json(install(&app, &ctx.artifacts.installation("apple", "1.0")).await).await;
    let id = created["id"].as_str().unwrap();

    let deleted = send(
        &app,
        Method::DELETE,
        &format!("/v1/agent/slot/{id}"),
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(deleted.status(), StatusCode::OK);
    assert_eq!(read_json(deleted).await["state"], "TERMINATED");

    let response = send(
        &app,
        Method::PUT,
        &format!("/v1/agent/slot/{id}/lifecycle"),
        &[],
        Body::from("running"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_installation_is_bad_request() {
    let ctx = TestContext::new();
    let app = app(&ctx).await;
    let mut installation = ctx.artifacts.installation("apple", "1.0");
    installation.binary_file = url::Url::parse("ftp://example.com/apple.tar.gz").unwrap();

    let response = install(&app, &installation).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "validation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_requests_with_same_slot_version() {
    let mut ctx = TestContext::with_lifecycle(MockLifecycleManager::slow(Duration::from_millis(300)));
    ctx.config.max_lock_wait = Duration::from_secs(5);
    let app = app(&ctx).await;
    let created = read_json(install(&app, &ctx.artifacts.installation("apple", "1.0")).await).await;
    let uri = format!("/v1/agent/slot/{}/lifecycle", created["id"].as_str().unwrap());

    let started = send(&app, Method::PUT, &uri, &[], Body::from("running")).await;
    let version = header_str(&started, SLOT_VERSION_HEADER);
    let headers = [(SLOT_VERSION_HEADER, version.as_str())];

    let (stopped, killed) = tokio::join!(
        send(&app, Method::PUT, &uri, &headers, Body::from("stopped")),
        send(&app, Method::PUT, &uri, &headers, Body::from("killing")),
    );
    let statuses = [stopped.status(), killed.status()];
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        1
    );

    let calls = ctx.lifecycle.call_names().await;
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[2], "stop" | "kill"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_install_request_still_completes() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let ctx = TestContext::new();
    let agent = Arc::new(ctx.agent().await);
    let app = router(agent.clone());

    let mut installation = ctx.artifacts.installation("apple", "1.0");
    let archive = std::fs::read(installation.binary_file.to_file_path().unwrap()).unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/apple-1.0.tar.gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(archive)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    installation.binary_file =
        url::Url::parse(&format!("{}/apple-1.0.tar.gz", server.uri())).unwrap();

    // The client gives up while the archive is still downloading.
    let request = install(&app, &installation);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), request)
            .await
            .is_err()
    );
    assert!(agent.all_slots().is_empty());

    let deadline = Instant::now() + Duration::from_secs(5);
    while agent.all_slots().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let slots = agent.all_slots();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].location(), "/test/host/apple");

    let reloaded = ctx.agent().await;
    assert_eq!(reloaded.all_slots().len(), 1);
    let status = reloaded.slot_status(slots[0].id()).await.unwrap();
    assert_eq!(status.assignment().unwrap().binary, "food.fruit:apple:1.0");
    assert_eq!(status.state(), berth_agent::status::SlotLifecycleState::Stopped);
}
