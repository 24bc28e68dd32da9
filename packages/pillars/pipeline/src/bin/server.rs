//! AgentKern-Pipeline Server
//!
//! HTTP front door exercising the composed admission pipeline end to end: a
//! request lands on `/admit`, passes through phase gate, tenant context, rate
//! limiter, quota tracker, prompt safety, circuit-protected inference, output
//! validation, and (for risky plans) the approval gate, with every stage
//! audited. The inference call itself is a stand-in: the real model runtime
//! is an external collaborator out of scope for this crate.

use std::sync::Arc;
use std::time::Duration;

use agentkern_arbiter::{ActionPlan, ApprovalError, ApprovalGate};
use agentkern_gate::prompt_safety::Allowlist;
use agentkern_gate::{AppConfig, CircuitRegistry, GateServices, PhaseGate, RateLimiter, UsageKind, UsageTracker};
use agentkern_pipeline::inference::{InferenceClient, InferenceError, InferenceOutput};
use agentkern_pipeline::{AdmissionError, AdmissionOutcome, AdmissionPipeline, RequestKind};
use agentkern_tenancy::TenantContext;
use anyhow::Context;
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stands in for the inference runtime collaborator. Always returns a
/// freeform response variant; wiring a real model client is the
/// application's job, not this crate's.
struct NoopInferenceClient;

#[async_trait]
impl InferenceClient for NoopInferenceClient {
    async fn call(&self, sanitized_prompt: &str) -> Result<InferenceOutput, InferenceError> {
        Ok(InferenceOutput::Response(serde_json::json!({
            "echo": sanitized_prompt,
        })))
    }
}

struct AppState {
    pipeline: AdmissionPipeline,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct AdmitRequest {
    request_id: String,
    tenant_id: String,
    actor_id: String,
    prompt: String,
    #[serde(default)]
    kind: RequestKindWire,
    #[serde(default)]
    usage_kind: UsageKindWire,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RequestKindWire {
    Read,
    #[default]
    Propose,
    Execute,
}

impl From<RequestKindWire> for RequestKind {
    fn from(value: RequestKindWire) -> Self {
        match value {
            RequestKindWire::Read => RequestKind::Read,
            RequestKindWire::Propose => RequestKind::Propose,
            RequestKindWire::Execute => RequestKind::Execute,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum UsageKindWire {
    #[default]
    Chat,
    Action,
    Execution,
    Advisory,
}

impl From<UsageKindWire> for UsageKind {
    fn from(value: UsageKindWire) -> Self {
        match value {
            UsageKindWire::Chat => UsageKind::Chat,
            UsageKindWire::Action => UsageKind::Action,
            UsageKindWire::Execution => UsageKind::Execution,
            UsageKindWire::Advisory => UsageKind::Advisory,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum AdmitResponse {
    AutoApproved { output: serde_json::Value },
    ApprovalRequired { token: String, expires_at: i64 },
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    tenant_id: String,
    action_id: String,
    token: String,
    current_plan: ActionPlan,
}

#[derive(Debug, Deserialize)]
struct PendingApprovalsQuery {
    tenant_id: String,
}

/// `{ error_code, message, retry_after?, details? }` shape sent to callers.
struct ApiError {
    status: StatusCode,
    error_code: &'static str,
    message: String,
    retry_after: Option<u64>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error_code": self.error_code,
                "message": self.message,
                "retry_after": self.retry_after,
            })),
        )
            .into_response()
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        let status = match &err {
            AdmissionError::Phase(_) => StatusCode::FORBIDDEN,
            AdmissionError::Tenant(_) => StatusCode::UNAUTHORIZED,
            AdmissionError::RateLimit(_) | AdmissionError::Quota(_) => StatusCode::TOO_MANY_REQUESTS,
            AdmissionError::PromptSafety(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AdmissionError::Circuit(_) | AdmissionError::InferenceTimeout => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::Approval(_) => StatusCode::ACCEPTED,
        };
        Self {
            status,
            error_code: err.error_code(),
            retry_after: err.retry_after_secs(),
            message: err.to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let gate = GateServices::new(config.clone());
    let (audit, mut drain) = agentkern_arbiter::AuditSink::new(1024);

    let hmac_key = std::env::var("AI_ENCRYPTION_KEY")
        .unwrap_or_else(|_| "development-only-key-do-not-use-in-production".to_string())
        .into_bytes();

    let pipeline = AdmissionPipeline {
        phase: gate.phase,
        rate_limiter: gate.rate_limiter,
        usage: gate.usage,
        circuits: gate.circuits,
        approval: ApprovalGate::new(hmac_key, audit.clone()),
        allowlist: Allowlist::default(),
        prompt_risk_threshold: config.prompt_risk_threshold,
        audit: audit.clone(),
        inference: Arc::new(NoopInferenceClient),
    };

    // Drain audit events to tracing; a real deployment swaps this task for one
    // that writes to the persistent audit store.
    tokio::spawn(async move {
        while let Some(event) = drain.recv().await {
            tracing::info!(
                event_type = ?event.event_type,
                tenant_id = %event.tenant_id,
                actor_id = %event.actor_id,
                outcome = %event.outcome,
                "audit_event"
            );
        }
    });

    let state = Arc::new(AppState { pipeline });

    // Periodic sweep of expired pending-approval entries.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            sweep_state.pipeline.approval.sweep_expired();
        }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/admit", post(admit))
        .route("/approve", post(approve))
        .route("/approvals/pending", get(pending_approvals))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3010".to_string());
    let addr = format!("0.0.0.0:{port}");

    tracing::info!("AgentKern-Pipeline server running on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("pipeline-server event loop exited")?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", version: env!("CARGO_PKG_VERSION") })
}

async fn admit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdmitRequest>,
) -> Result<Json<AdmitResponse>, ApiError> {
    let ctx = TenantContext::new(req.tenant_id.clone(), req.actor_id.clone());
    let outcome = agentkern_tenancy::with_context(ctx, async {
        state
            .pipeline
            .admit(
                &req.request_id,
                req.kind.into(),
                &req.tenant_id,
                &req.actor_id,
                &req.prompt,
                req.usage_kind.into(),
            )
            .await
    })
    .await?;

    Ok(Json(match outcome {
        AdmissionOutcome::AutoApproved { output } => {
            AdmitResponse::AutoApproved { output: output.as_value() }
        }
        AdmissionOutcome::ApprovalRequired { encoded_token, expires_at } => {
            AdmitResponse::ApprovalRequired { token: encoded_token, expires_at }
        }
    }))
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .pipeline
        .approval
        .approve(&req.token, &req.tenant_id, &req.action_id, &req.current_plan)
        .map_err(|err: ApprovalError| ApiError {
            status: StatusCode::CONFLICT,
            error_code: "approval_token_invalid",
            message: err.to_string(),
            retry_after: None,
        })?;
    Ok(Json(serde_json::json!({ "approved": true })))
}

async fn pending_approvals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingApprovalsQuery>,
) -> Json<serde_json::Value> {
    let pending = state.pipeline.approval.pending_approvals(&query.tenant_id);
    Json(serde_json::json!({ "tenant_id": query.tenant_id, "pending": pending }))
}
