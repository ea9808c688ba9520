//! HTTP surface.
//!
//! - `POST /webhook`: 401 on a bad signature, 200 for everything else so the
//!   upstream source never retries into a storm
//! - `GET /healthz`
//! - `GET /status`

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::app::validator::{EVENT_HEADER, SIGNATURE_HEADER};
use crate::app::{EventValidator, RawRequest, RunnerController, StatusView};
use crate::domain::{DomainEvent, ErrorKind, ValidationError};

const MAX_IN_FLIGHT: u32 = 1 << 20;

/// Counts event handlers that are still applying a transition.
#[derive(Clone)]
pub struct InFlight(Arc<Semaphore>);

impl InFlight {
    pub fn new() -> Self {
        Self(Arc::new(Semaphore::new(MAX_IN_FLIGHT as usize)))
    }

    /// `None` only when the counter is saturated; the caller proceeds untracked.
    pub fn enter(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.0).try_acquire_owned().ok()
    }

    pub fn active(&self) -> usize {
        MAX_IN_FLIGHT as usize - self.0.available_permits()
    }

    /// Resolves once every handler has finished.
    pub async fn drained(&self) {
        let _ = self.0.acquire_many(MAX_IN_FLIGHT).await;
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<EventValidator>,
    pub controller: Arc<RunnerController>,
    pub in_flight: InFlight,
}

impl AppState {
    pub fn new(validator: EventValidator, controller: Arc<RunnerController>) -> Self {
        Self {
            validator: Arc::new(validator),
            controller,
            in_flight: InFlight::new(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(state)
}

async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let request = RawRequest {
        event_kind: header(EVENT_HEADER),
        signature: header(SIGNATURE_HEADER),
        body: &body,
    };

    let event = match state.validator.validate(request) {
        Ok(DomainEvent::Job(event)) => event,
        Err(ValidationError::InvalidSignature(reason)) => {
            warn!(reason, "rejecting webhook with invalid signature");
            return StatusCode::UNAUTHORIZED;
        }
        Err(e) => {
            info!(error = %e, "discarding webhook");
            return StatusCode::OK;
        }
    };

    // 接続が切れても遷移を途中で止めないように別タスクで実行する
    let run_id = event.run_id;
    let permit = state.in_flight.enter();
    let controller = Arc::clone(&state.controller);
    let task = tokio::spawn(async move {
        let result = controller.handle(event).await;
        drop(permit);
        result
    });

    match task.await {
        Ok(Ok(transition)) => debug!(%run_id, ?transition, "event applied"),
        Ok(Err(e)) if e.kind() == ErrorKind::Duplicate => debug!(%run_id, error = %e, "event was a no-op"),
        Ok(Err(e)) => warn!(%run_id, error = %e, "event failed"),
        Err(e) => error!(%run_id, error = %e, "event handler panicked"),
    }
    StatusCode::OK
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<AppState>) -> Json<StatusView> {
    Json(state.controller.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::validator::sign;
    use crate::app::{ControllerConfig, IdentityRegistry};
    use crate::domain::{RunId, RunState};
    use crate::impls::InMemoryProvisioner;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"webhook-secret";

    fn state() -> (AppState, Arc<InMemoryProvisioner>) {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let controller = Arc::new(RunnerController::new(
            ControllerConfig::default(),
            provisioner.clone(),
            Arc::new(IdentityRegistry::new()),
        ));
        (AppState::new(EventValidator::new(SECRET), controller), provisioner)
    }

    fn webhook_request(kind: &str, body: &[u8], signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .header(EVENT_HEADER, kind);
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(body.to_vec())).expect("request")
    }

    fn job_body(action: &str, runner: Option<&str>) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "workflow_job": { "id": 42, "runner_name": runner, "conclusion": null },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn queued_webhook_spawns_runner() {
        let (state, provisioner) = state();
        let app = router(state.clone());
        let body = job_body("queued", None);

        let response = app
            .oneshot(webhook_request("workflow_job", &body, Some(sign(SECRET, &body))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(provisioner.create_count(), 1);
        assert_eq!(provisioner.start_count(), 1);
        let run = state.controller.run(RunId::new(42)).await.unwrap();
        assert_eq!(run.state, RunState::Running);
        assert_eq!(state.in_flight.active(), 0);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let (state, provisioner) = state();
        let body = job_body("queued", None);

        let response = router(state)
            .oneshot(webhook_request("workflow_job", &body, Some(sign(b"wrong", &body))))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_is_unauthorized() {
        let (state, _) = state();
        let body = job_body("queued", None);
        let response = router(state)
            .oneshot(webhook_request("workflow_job", &body, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn other_events_and_garbage_are_accepted_and_discarded() {
        let (state, provisioner) = state();
        let app = router(state);

        let ping = br#"{"zen":"Design for failure."}"#;
        let response = app
            .clone()
            .oneshot(webhook_request("ping", ping, Some(sign(SECRET, ping))))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let garbage = b"not json";
        let response = app
            .oneshot(webhook_request("workflow_job", garbage, Some(sign(SECRET, garbage))))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn provisioning_failure_still_answers_ok() {
        let (state, provisioner) = state();
        provisioner.fail_next_create();
        let body = job_body("queued", None);

        let response = router(state)
            .oneshot(webhook_request("workflow_job", &body, Some(sign(SECRET, &body))))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn healthz_and_status() {
        let (state, _) = state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let view: StatusView = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(view, StatusView::default());
    }
}
