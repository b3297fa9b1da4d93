// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP boundary for the agent.
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | GET | `/v1/agent` | agent status |
//! | GET | `/v1/agent/slot` | all slot statuses |
//! | POST | `/v1/agent/slot` | install into a new slot (201) |
//! | GET | `/v1/agent/slot/{id}` | slot status |
//! | DELETE | `/v1/agent/slot/{id}` | terminate slot |
//! | PUT | `/v1/agent/slot/{id}/assignment` | assign |
//! | PUT | `/v1/agent/slot/{id}/lifecycle` | `running`, `restarting`, `stopped` or `killing` |
//!
//! Mutations honor optional `x-berth-agent-version` and
//! `x-berth-slot-version` request headers; a stale value is rejected with
//! 409 before anything is changed. The slot version is compared under the
//! slot lock. Each mutation runs on its own task, so a client that goes
//! away mid-request does not leave a half-applied change behind.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::error::Error;
use crate::model::Installation;
use crate::slot::{Slot, SlotOperation};
use crate::status::SlotStatus;
use crate::version::{AGENT_VERSION_HEADER, SLOT_VERSION_HEADER, check_version};

/// Build the agent router.
pub fn router(agent: Arc<Agent>) -> Router {
    Router::new()
        .route("/v1/agent", get(get_agent))
        .route("/v1/agent/slot", get(list_slots).post(install_slot))
        .route("/v1/agent/slot/{id}", get(get_slot).delete(terminate_slot))
        .route("/v1/agent/slot/{id}/assignment", put(assign_slot))
        .route("/v1/agent/slot/{id}/lifecycle", put(set_lifecycle))
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

// ============================================================================
// Errors
// ============================================================================

/// Error rendered as `{"error": ..., "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    conflict: Option<(&'static str, String, String)>,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
            conflict: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: message.into(),
            conflict: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
            conflict: None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        let (status, code, conflict) = match err {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation", None),
            Error::IllegalState(_) => (StatusCode::BAD_REQUEST, "illegal_state", None),
            Error::SlotNotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            Error::VersionConflict {
                header,
                expected,
                actual,
            } => (
                StatusCode::CONFLICT,
                "version_conflict",
                Some((header, expected, actual)),
            ),
            Error::LockTimeout { .. } => (StatusCode::SERVICE_UNAVAILABLE, "lock_timeout", None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal", None),
        };
        Self {
            status,
            code,
            message,
            conflict,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() && self.status != StatusCode::SERVICE_UNAVAILABLE {
            error!(status = %self.status, error = %self.message, "Request failed");
        } else {
            warn!(status = %self.status, error = %self.message, "Request rejected");
        }

        match self.conflict {
            Some((header, expected, actual)) => {
                let body = json!({
                    "error": self.code,
                    "message": self.message,
                    "expected": expected,
                    "actual": actual,
                });
                let mut response = (self.status, Json(body)).into_response();
                if let Ok(value) = HeaderValue::from_str(&actual) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(header), value);
                }
                response
            }
            None => (
                self.status,
                Json(json!({"error": self.code, "message": self.message})),
            )
                .into_response(),
        }
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

// ============================================================================
// Helpers
// ============================================================================

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn slot_version_header(headers: &HeaderMap) -> Option<String> {
    header_value(headers, SLOT_VERSION_HEADER).map(str::to_string)
}

fn parse_slot_id(raw: &str) -> std::result::Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(format!("Slot not found: {raw}")))
}

fn lookup_slot(agent: &Agent, raw: &str) -> std::result::Result<Arc<Slot>, ApiError> {
    let id = parse_slot_id(raw)?;
    agent
        .get_slot(id)
        .ok_or_else(|| Error::SlotNotFound(id).into())
}

async fn check_agent_version(agent: &Agent, headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(expected) = header_value(headers, AGENT_VERSION_HEADER) {
        let current = agent.agent_status().await;
        check_version(AGENT_VERSION_HEADER, Some(expected), current.version())?;
    }
    Ok(())
}

/// Run a mutation on its own task and wait for it. Dropping the request
/// future (client disconnect) leaves the task running to completion.
async fn run_detached<T, F>(work: F) -> Result<T, ApiError>
where
    F: Future<Output = crate::error::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::internal(format!("operation task failed: {e}"))),
    }
}

fn with_version(response: &mut Response, header: &'static str, version: &str) {
    if let Ok(value) = HeaderValue::from_str(version) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(header), value);
    }
}

/// Single-slot response carrying both version headers.
async fn slot_response(agent: &Agent, status: StatusCode, slot: SlotStatus) -> Response {
    let agent_version = agent.agent_status().await.version().to_string();
    let slot_version = slot.version().to_string();
    let mut response = (status, Json(slot)).into_response();
    with_version(&mut response, SLOT_VERSION_HEADER, &slot_version);
    with_version(&mut response, AGENT_VERSION_HEADER, &agent_version);
    response
}

/// Lifecycle verbs accepted by `PUT .../lifecycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleVerb {
    /// Start
    Running,
    /// Restart
    Restarting,
    /// Graceful stop
    Stopped,
    /// Forced stop
    Killing,
}

impl FromStr for LifecycleVerb {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Accept a bare word or a JSON string.
        match s.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "running" => Ok(LifecycleVerb::Running),
            "restarting" => Ok(LifecycleVerb::Restarting),
            "stopped" => Ok(LifecycleVerb::Stopped),
            "killing" => Ok(LifecycleVerb::Killing),
            other => Err(format!("Unknown lifecycle state: {other}")),
        }
    }
}

impl LifecycleVerb {
    /// Slot operation requested by this verb.
    pub fn operation(self) -> SlotOperation<'static> {
        match self {
            LifecycleVerb::Running => SlotOperation::Start,
            LifecycleVerb::Restarting => SlotOperation::Restart,
            LifecycleVerb::Stopped => SlotOperation::Stop,
            LifecycleVerb::Killing => SlotOperation::Kill,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn get_agent(State(agent): State<Arc<Agent>>) -> Response {
    let status = agent.agent_status().await;
    let version = status.version().to_string();
    let mut response = Json(status).into_response();
    with_version(&mut response, AGENT_VERSION_HEADER, &version);
    response
}

async fn list_slots(State(agent): State<Arc<Agent>>) -> Response {
    let status = agent.agent_status().await;
    let version = status.version().to_string();
    let mut response = Json(status.slots().to_vec()).into_response();
    with_version(&mut response, AGENT_VERSION_HEADER, &version);
    response
}

async fn install_slot(
    State(agent): State<Arc<Agent>>,
    headers: HeaderMap,
    Json(installation): Json<Installation>,
) -> ApiResult {
    check_agent_version(&agent, &headers).await?;

    let assignment = installation.assignment.clone();
    let status = {
        let agent = agent.clone();
        run_detached(async move { agent.install(&installation).await }).await?
    };
    info!(slot_id = %status.id(), assignment = %assignment, "Slot created");

    let location = status.external_uri().to_string();
    let mut response = slot_response(&agent, StatusCode::CREATED, status).await;
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(LOCATION, value);
    }
    Ok(response)
}

async fn get_slot(State(agent): State<Arc<Agent>>, Path(id): Path<String>) -> ApiResult {
    let id = parse_slot_id(&id)?;
    let status = agent.slot_status(id).await?;
    Ok(slot_response(&agent, StatusCode::OK, status).await)
}

async fn terminate_slot(
    State(agent): State<Arc<Agent>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult {
    let slot = lookup_slot(&agent, &id)?;
    check_agent_version(&agent, &headers).await?;

    let expected = slot_version_header(&headers);
    let status = {
        let agent = agent.clone();
        let id = slot.id();
        run_detached(async move { agent.terminate_slot(id, expected.as_deref()).await }).await?
    };
    Ok(slot_response(&agent, StatusCode::OK, status).await)
}

async fn assign_slot(
    State(agent): State<Arc<Agent>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(installation): Json<Installation>,
) -> ApiResult {
    let slot = lookup_slot(&agent, &id)?;
    check_agent_version(&agent, &headers).await?;

    let expected = slot_version_header(&headers);
    let status = run_detached(async move {
        slot.apply(SlotOperation::Assign(&installation), expected.as_deref())
            .await
    })
    .await?;
    Ok(slot_response(&agent, StatusCode::OK, agent.stamp(status)).await)
}

async fn set_lifecycle(
    State(agent): State<Arc<Agent>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult {
    let slot = lookup_slot(&agent, &id)?;
    let verb = body.parse::<LifecycleVerb>().map_err(ApiError::bad_request)?;

    let expected = slot_version_header(&headers);
    let status = run_detached(async move {
        slot.apply(verb.operation(), expected.as_deref()).await
    })
    .await?;
    Ok(slot_response(&agent, StatusCode::OK, agent.stamp(status)).await)
}
