use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use frkb_engine::{maintenance, SyncEngine, SyncError};
use frkb_store::UserDirectory;

use crate::auth;
use crate::config::GatewayConfig;
use crate::wire::*;

const API_PREFIX: &str = "/frkbapi/v1/fingerprint-sync";

#[derive(Clone)]
pub struct SyncApi {
    pub engine: Arc<SyncEngine>,
    pub directory: Arc<dyn UserDirectory>,
    pub config: Arc<GatewayConfig>,
}

impl SyncApi {
    pub fn new(
        engine: Arc<SyncEngine>,
        directory: Arc<dyn UserDirectory>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            engine,
            directory,
            config,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        let sync = Router::new()
            .route("/check", post(check_handler))
            .route("/bidirectional-diff", post(bidirectional_diff_handler))
            .route("/add", post(add_handler))
            .route("/analyze-diff", post(analyze_diff_handler))
            .route("/pull-diff-page", post(pull_diff_page_handler))
            .route("/reset", post(reset_handler))
            .route("/status", get(status_handler))
            .route("/service-stats", get(service_stats_handler))
            .route("/error-report", post(error_report_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth::api_key_middleware,
            ));

        let admin = Router::new()
            .route("/lock/:user_key", delete(force_unlock_handler))
            .route("/cache/:user_key", delete(clear_cache_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.clone(),
                auth::admin_token_middleware,
            ));

        let public = Router::new().route("/health", get(health_handler));

        Router::new()
            .nest(API_PREFIX, sync.merge(admin))
            .merge(public)
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        let engine = self.engine.clone();
        let router = Arc::new(self).router();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(maintenance::run(engine, shutdown_rx));

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("fingerprint-sync API listening on {}", addr);

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await?;

        let _ = shutdown_tx.send(true);
        let _ = sweeper.await;
        Ok(())
    }

    fn admit(&self, raw_user_key: &str) -> Result<frkb_store::UserKey, ApiError> {
        auth::admit_user(&self.directory, raw_user_key).map_err(ApiError)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Performance {
    duration_ms: u64,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    data: T,
    performance: Performance,
    timestamp: String,
}

fn envelope<T: Serialize>(data: T, started: Instant) -> Response {
    Json(Envelope {
        success: true,
        data,
        performance: Performance {
            duration_ms: started.elapsed().as_millis() as u64,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
    .into_response()
}

struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = serde_json::json!({
            "error": self.0.code(),
            "message": self.0.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let SyncError::DiffSessionNotFound {
            retry_after_secs, ..
        } = &self.0
        {
            body["details"] = serde_json::json!({ "retryAfter": retry_after_secs });
        }
        (status, Json(body)).into_response()
    }
}

async fn check_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&req.user_key)?;
    let outcome = state.engine.check(&user, req.count, &req.hash)?;
    Ok(envelope(outcome, started))
}

async fn bidirectional_diff_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<BidirectionalDiffRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&req.user_key)?;
    let batch_size = req
        .batch_size
        .unwrap_or(state.engine.config().batch_size);
    let outcome = state.engine.bidirectional_diff(
        &user,
        &req.client_fingerprints,
        req.batch_index,
        batch_size,
    )?;
    Ok(envelope(outcome, started))
}

async fn add_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<AddRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&req.user_key)?;
    let outcome = state.engine.batch_add(&user, &req.add_fingerprints)?;
    Ok(envelope(outcome, started))
}

async fn analyze_diff_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&req.user_key)?;
    let outcome = state
        .engine
        .analyze_difference(&user, &req.client_fingerprints)?;
    Ok(envelope(outcome, started))
}

async fn pull_diff_page_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<PullDiffPageRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&req.user_key)?;
    let outcome = state
        .engine
        .pull_diff_page(&user, &req.diff_session_id, req.page_index)?;
    Ok(envelope(outcome, started))
}

async fn reset_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<ResetRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&req.user_key)?;
    let outcome = state.engine.reset_user(&user, req.notes.as_deref())?;

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct ResetEnvelope {
        message: &'static str,
        #[serde(flatten)]
        outcome: frkb_engine::ResetOutcome,
    }
    Ok(envelope(
        ResetEnvelope {
            message: "user data reset",
            outcome,
        },
        started,
    ))
}

async fn status_handler(
    State(state): State<Arc<SyncApi>>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = state.admit(&query.user_key)?;
    let report = state.engine.sync_status(&user)?;
    Ok(envelope(report, started))
}

async fn service_stats_handler(State(state): State<Arc<SyncApi>>) -> Result<Response, ApiError> {
    let started = Instant::now();
    let stats = state.engine.service_stats()?;
    Ok(envelope(stats, started))
}

async fn error_report_handler(
    State(state): State<Arc<SyncApi>>,
    Json(req): Json<ErrorReportRequest>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    // Textual client error reports are logged for operators; nothing is
    // persisted.
    let user = match &req.user_key {
        Some(raw) => Some(state.admit(raw)?),
        None => None,
    };
    info!(
        user = ?user.as_ref().map(|u| u.short()),
        bytes = req.report.len(),
        "client error report"
    );

    #[derive(Serialize)]
    struct Ack {
        received: bool,
    }
    Ok(envelope(Ack { received: true }, started))
}

async fn force_unlock_handler(
    State(state): State<Arc<SyncApi>>,
    Path(user_key): Path<String>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = frkb_store::UserKey::parse(&user_key)
        .map_err(|_| SyncError::InvalidUserKey { value: user_key })?;
    let released = state.engine.force_unlock(&user);

    #[derive(Serialize)]
    struct Released {
        released: bool,
    }
    Ok(envelope(Released { released }, started))
}

async fn clear_cache_handler(
    State(state): State<Arc<SyncApi>>,
    Path(user_key): Path<String>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let user = frkb_store::UserKey::parse(&user_key)
        .map_err(|_| SyncError::InvalidUserKey { value: user_key })?;
    state.engine.clear_user_caches(&user);

    #[derive(Serialize)]
    struct Cleared {
        cleared: bool,
    }
    Ok(envelope(Cleared { cleared: true }, started))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
