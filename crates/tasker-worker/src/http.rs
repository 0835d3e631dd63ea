//! # HTTP Ingress
//!
//! `POST /events` accepts an event for the bus; `GET /health` reports
//! storage/bus/queue reachability; `GET /metrics` exposes a handful of
//! Prometheus-text counters. Mirrors the teacher's `axum` + `tower-http`
//! tracing-layer convention rather than rolling bespoke middleware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tasker_runtime::EventBus;
use tasker_shared::events::payload::{
    DocumentApprovalDecisionPayload, DocumentApprovalReminderPayload, DocumentApprovalStartPayload,
    EmailSendPayload, FxIngestManualPayload, InvoiceApprovedPayload, PdfGeneratePayload,
};
use tasker_shared::{Event, EventPayload, EventUser};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Runtime;

/// Counters the metrics endpoint exposes. Incremented from the ingress
/// handler and (via [`Metrics::clone`]'d `Arc`s) from the composition
/// root's background loops; a real backend would wire these through
/// `opentelemetry` instead of a hand-rolled exposition text.
#[derive(Debug, Default)]
pub struct Metrics {
    pub events_published: AtomicU64,
    pub events_rejected_duplicate: AtomicU64,
}

#[derive(Debug, Clone)]
struct AppState {
    runtime: Arc<Runtime>,
    metrics: Arc<Metrics>,
}

pub fn router(runtime: Arc<Runtime>, metrics: Arc<Metrics>) -> Router {
    let state = AppState { runtime, metrics };
    Router::new()
        .route("/events", post(publish_event))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct PublishEventRequest {
    name: String,
    data: Value,
    id: Option<Uuid>,
    #[serde(rename = "idempotencyKey")]
    idempotency_key: Option<String>,
    #[serde(rename = "scheduledFor")]
    scheduled_for: Option<DateTime<Utc>>,
    user: Option<EventUser>,
}

#[derive(Debug, Serialize)]
struct PublishEventResponse {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Maps an ingress event name to its typed [`EventPayload`] variant,
/// deserializing `data` into the matching struct. An unrecognized name
/// is still accepted — it becomes [`EventPayload::Unknown`], which the
/// worker pool acks as unroutable rather than dispatching.
fn payload_for(name: &str, data: Value) -> Result<EventPayload, serde_json::Error> {
    use tasker_shared::events::names;

    Ok(match name {
        names::FX_INGEST_MANUAL => EventPayload::FxIngestManual(serde_json::from_value::<FxIngestManualPayload>(data)?),
        names::PDF_GENERATE => EventPayload::PdfGenerate(serde_json::from_value::<PdfGeneratePayload>(data)?),
        names::EMAIL_SEND => EventPayload::EmailSend(serde_json::from_value::<EmailSendPayload>(data)?),
        names::INVOICE_APPROVED => EventPayload::InvoiceApproved(serde_json::from_value::<InvoiceApprovedPayload>(data)?),
        names::DOCUMENT_APPROVAL_START => {
            EventPayload::DocumentApprovalStart(serde_json::from_value::<DocumentApprovalStartPayload>(data)?)
        }
        names::DOCUMENT_APPROVAL_DECISION => {
            EventPayload::DocumentApprovalDecision(serde_json::from_value::<DocumentApprovalDecisionPayload>(data)?)
        }
        names::DOCUMENT_APPROVAL_REMINDER => {
            EventPayload::DocumentApprovalReminder(serde_json::from_value::<DocumentApprovalReminderPayload>(data)?)
        }
        _ => EventPayload::Unknown(data),
    })
}

async fn publish_event(State(state): State<AppState>, Json(req): Json<PublishEventRequest>) -> Response {
    if let Some(key) = &req.idempotency_key {
        if state.runtime.bus.contains_idempotency_key(key) {
            state.metrics.events_rejected_duplicate.fetch_add(1, Ordering::Relaxed);
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: format!("duplicate idempotency key '{key}'"),
                }),
            )
                .into_response();
        }
    }

    let payload = match payload_for(&req.name, req.data) {
        Ok(payload) => payload,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("malformed event data for '{}': {err}", req.name),
                }),
            )
                .into_response();
        }
    };

    let now = Utc::now();
    let id = req.id.unwrap_or_else(Uuid::now_v7);
    let mut event = Event::new(id, req.name.clone(), payload, now);
    event.user = req.user;
    if let Some(key) = req.idempotency_key {
        event = event.with_idempotency_key(key);
    }
    if let Some(scheduled_for) = req.scheduled_for {
        event = event.with_scheduled_for(scheduled_for);
    }

    match state.runtime.bus.publish(event).await {
        Ok(published_id) => {
            state.metrics.events_published.fetch_add(1, Ordering::Relaxed);
            (StatusCode::ACCEPTED, Json(PublishEventResponse { id: published_id })).into_response()
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse { error: err.to_string() }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HealthCheck {
    name: &'static str,
    status: &'static str,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    checks: Vec<HealthCheck>,
}

const QUEUE_LENGTH_WARNING_THRESHOLD: usize = 10_000;

async fn health(State(state): State<AppState>) -> Response {
    let mut checks = vec![HealthCheck {
        name: "bus",
        status: "healthy",
        error: None,
    }];

    let queue_len = state.runtime.bus.queue_len();
    checks.push(if queue_len < QUEUE_LENGTH_WARNING_THRESHOLD {
        HealthCheck {
            name: "queue_length",
            status: "healthy",
            error: None,
        }
    } else {
        HealthCheck {
            name: "queue_length",
            status: "unhealthy",
            error: Some(format!("{queue_len} events queued, exceeds threshold {QUEUE_LENGTH_WARNING_THRESHOLD}")),
        }
    });

    match state.runtime.data.get_workflow_run(Uuid::nil()).await {
        Ok(_) => checks.push(HealthCheck {
            name: "storage",
            status: "healthy",
            error: None,
        }),
        Err(err) => checks.push(HealthCheck {
            name: "storage",
            status: "unhealthy",
            error: Some(err.to_string()),
        }),
    }

    let overall = if checks.iter().all(|c| c.status == "healthy") {
        "healthy"
    } else {
        "unhealthy"
    };
    let status_code = if overall == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(HealthResponse { status: overall, checks })).into_response()
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    let published = state.metrics.events_published.load(Ordering::Relaxed);
    let rejected = state.metrics.events_rejected_duplicate.load(Ordering::Relaxed);
    let queue_len = state.runtime.bus.queue_len();
    let registered_functions = state.runtime.registry.len();

    let body = format!(
        "# HELP tasker_events_published_total Events accepted by the ingress.\n\
         # TYPE tasker_events_published_total counter\n\
         tasker_events_published_total {published}\n\
         # HELP tasker_events_rejected_duplicate_total Events rejected as duplicate idempotency keys.\n\
         # TYPE tasker_events_rejected_duplicate_total counter\n\
         tasker_events_rejected_duplicate_total {rejected}\n\
         # HELP tasker_queue_length Events currently queued on the bus.\n\
         # TYPE tasker_queue_length gauge\n\
         tasker_queue_length {queue_len}\n\
         # HELP tasker_registered_functions Functions registered at startup.\n\
         # TYPE tasker_registered_functions gauge\n\
         tasker_registered_functions {registered_functions}\n"
    );

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}
