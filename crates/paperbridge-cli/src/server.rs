//! Webhook server: `POST /webhook`, `GET /health`, `POST /sync`.
//!
//! Blocking core calls run on the blocking pool. Webhook requests are
//! bounded by the operation timeout; sync passes run in the background and
//! report through `/health`.

use crate::runtime::Runtime;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use paperbridge_core::event::InboundEvent;
use paperbridge_core::router::RouterError;
use paperbridge_core::sync::{SyncError, SyncSummary};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Clone)]
pub struct ServiceState {
    runtime: Arc<Runtime>,
    operation_timeout: Duration,
    sync_running: Arc<AtomicBool>,
    last_sync: Arc<Mutex<Option<LastSync>>>,
}

#[derive(Debug, Clone, Serialize)]
struct Envelope<T: Serialize> {
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorPayload {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
}

/// Failure rendered as `{"error": {"code", "message"}}`.
#[derive(Debug, Clone)]
pub struct ServiceFailure {
    status: StatusCode,
    code: &'static str,
    message: String,
    error_code: Option<&'static str>,
}

impl ServiceFailure {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            error_code: None,
        }
    }

    // Every malformed body is a 400, whatever axum's rejection status.
    fn invalid_json(rejection: &JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_json", rejection.body_text())
    }
}

impl From<RouterError> for ServiceFailure {
    fn from(err: RouterError) -> Self {
        let (status, code) = match &err {
            RouterError::UnknownKind(_) => (StatusCode::BAD_REQUEST, "unknown_kind"),
            RouterError::MissingPaperId => (StatusCode::BAD_REQUEST, "missing_paper_id"),
            RouterError::NoMatchingIssue(_) => (StatusCode::NOT_FOUND, "no_matching_issue"),
            RouterError::Auth(_) | RouterError::Remote(_) => {
                (StatusCode::BAD_GATEWAY, "remote_failure")
            }
        };
        Self {
            status,
            code,
            message: err.to_string(),
            error_code: Some(err.code().code()),
        }
    }
}

impl IntoResponse for ServiceFailure {
    fn into_response(self) -> Response {
        let payload = ErrorEnvelope {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                error_code: self.error_code,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct WebhookAccepted {
    issue_number: u64,
    kind: String,
    paper_id: String,
}

/// Outcome of the most recent background pass.
#[derive(Debug, Clone, Serialize)]
pub struct LastSync {
    finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<SyncSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<SyncFailure>,
}

#[derive(Debug, Clone, Serialize)]
struct SyncFailure {
    code: &'static str,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    timeout_ms: u64,
    sync_running: bool,
    last_sync: Option<LastSync>,
}

#[derive(Debug, Clone, Serialize)]
struct SyncStarted {
    status: &'static str,
}

// Clears the running flag even if the pass panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ServiceState {
    pub fn new(runtime: Arc<Runtime>, operation_timeout: Duration) -> Self {
        Self {
            runtime,
            operation_timeout,
            sync_running: Arc::new(AtomicBool::new(false)),
            last_sync: Arc::new(Mutex::new(None)),
        }
    }

    /// Run `op` on the blocking pool, bounded by the operation timeout.
    ///
    /// A timed-out operation keeps running to completion in the background.
    async fn run_blocking<T, E, F>(&self, label: &'static str, op: F) -> Result<T, ServiceFailure>
    where
        T: Send + 'static,
        E: Into<ServiceFailure> + Send + 'static,
        F: FnOnce(&Runtime) -> Result<T, E> + Send + 'static,
    {
        let runtime = Arc::clone(&self.runtime);
        let handle = tokio::task::spawn_blocking(move || op(&runtime));
        let joined = tokio::time::timeout(self.operation_timeout, handle)
            .await
            .map_err(|_| {
                tracing::warn!(
                    operation = label,
                    timeout_ms = self.timeout_ms(),
                    "operation timed out"
                );
                ServiceFailure::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    "timeout",
                    format!("{label} timed out after {} ms", self.timeout_ms()),
                )
            })?;

        let result = joined.map_err(|err| {
            tracing::error!(operation = label, %err, "blocking task failed");
            ServiceFailure::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                format!("{label} join failure: {err}"),
            )
        })?;
        result.map_err(Into::into)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.operation_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn last_sync(&self) -> Option<LastSync> {
        self.last_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_sync(&self, outcome: Result<SyncSummary, SyncError>) {
        let last = match outcome {
            Ok(summary) => LastSync {
                finished_at: Utc::now(),
                summary: Some(summary),
                error: None,
            },
            Err(err) => {
                tracing::error!(code = %err.code(), %err, "sync pass aborted");
                LastSync {
                    finished_at: Utc::now(),
                    summary: None,
                    error: Some(SyncFailure {
                        code: err.code().code(),
                        message: err.to_string(),
                    }),
                }
            }
        };
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(last);
    }

    /// Start a background pass unless one is already running.
    pub fn start_sync(&self) -> bool {
        if self
            .sync_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let state = self.clone();
        tokio::spawn(async move {
            let guard = RunningGuard(Arc::clone(&state.sync_running));
            let runtime = Arc::clone(&state.runtime);
            let outcome = tokio::task::spawn_blocking(move || runtime.run_sync()).await;
            match outcome {
                Ok(result) => state.record_sync(result),
                Err(err) => tracing::error!(%err, "sync task failed"),
            }
            drop(guard);
        });
        true
    }
}

pub fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .route("/sync", post(sync))
        .with_state(state)
}

async fn webhook(
    State(state): State<ServiceState>,
    payload: Result<Json<InboundEvent>, JsonRejection>,
) -> Result<Json<Envelope<WebhookAccepted>>, ServiceFailure> {
    let Json(event) = payload.map_err(|rejection| {
        tracing::info!(%rejection, "rejected webhook body");
        ServiceFailure::invalid_json(&rejection)
    })?;
    let kind = event.kind.clone();
    let paper_id = event.paper_id.clone();

    let issue = state
        .run_blocking("webhook", move |runtime| runtime.router().route(&event))
        .await
        .inspect_err(|failure| {
            tracing::info!(code = failure.code, %kind, %paper_id, "webhook not relayed");
        })?;

    Ok(Json(Envelope {
        data: WebhookAccepted {
            issue_number: issue.number,
            kind,
            paper_id,
        },
    }))
}

async fn health(State(state): State<ServiceState>) -> Json<Envelope<HealthResponse>> {
    Json(Envelope {
        data: HealthResponse {
            status: "ok",
            timeout_ms: state.timeout_ms(),
            sync_running: state.sync_running.load(Ordering::SeqCst),
            last_sync: state.last_sync(),
        },
    })
}

async fn sync(
    State(state): State<ServiceState>,
) -> Result<(StatusCode, Json<Envelope<SyncStarted>>), ServiceFailure> {
    if state.start_sync() {
        Ok((
            StatusCode::ACCEPTED,
            Json(Envelope {
                data: SyncStarted { status: "started" },
            }),
        ))
    } else {
        Err(ServiceFailure::new(
            StatusCode::CONFLICT,
            "sync_in_progress",
            "a sync pass is already running",
        ))
    }
}

/// Serve until Ctrl-C.
pub async fn serve(state: ServiceState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "webhook server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}
