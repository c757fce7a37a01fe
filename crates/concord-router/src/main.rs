use axum::{extract::State, http::StatusCode, response::{IntoResponse, Response}, routing::{get, post}, Json, Router};
use concord_engine::{agreement_decision, batch_normalize, AgreementConfig, AgreementError};
use concord_schema::Decision;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
struct AppState { base: Arc<AgreementConfig>, prom: PrometheusHandle }

#[derive(Debug, Deserialize)]
struct AgreementRequest {
    texts: Vec<String>,
    /// Replaces the server defaults for this request when present.
    #[serde(default)]
    config: Option<AgreementConfig>,
    #[serde(default = "default_normalize")]
    normalize: bool,
}
fn default_normalize() -> bool { true }

#[derive(Debug, Serialize, Deserialize)]
struct TextsBody { texts: Vec<String> }

async fn metrics_handler(State(s): State<AppState>) -> String { s.prom.render() }

async fn normalize_route(Json(body): Json<TextsBody>) -> Json<TextsBody> {
    counter!("router_requests_total", "route" => "normalize").increment(1);
    Json(TextsBody { texts: batch_normalize(&body.texts) })
}

fn error_response(e: &AgreementError) -> Response {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({"error": e.kind(), "reason": e.to_string()}))).into_response()
}

async fn agreement_route(State(s): State<AppState>, Json(req): Json<AgreementRequest>) -> Response {
    counter!("router_requests_total", "route" => "agreement").increment(1);
    let cfg = req.config.unwrap_or_else(|| (*s.base).clone());
    let texts = if req.normalize { batch_normalize(&req.texts) } else { req.texts };
    let n = texts.len();
    let span = tracing::info_span!("agreement_request", n, model = %cfg.embed_model);
    let start_t = Instant::now();
    // the engine is synchronous and may block on a remote embedder
    let res = tokio::task::spawn_blocking(move || { let _e = span.enter(); agreement_decision(&texts, &cfg) }).await;
    histogram!("router_agreement_latency_ms").record(start_t.elapsed().as_secs_f64() * 1000.0);
    match res {
        Ok(Ok(decision)) => Json::<Decision>(decision).into_response(),
        Ok(Err(e)) => { tracing::warn!(error = %e, n, "agreement request failed"); error_response(&e) }
        Err(join) => {
            tracing::error!(error = %join, "agreement worker did not finish");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal", "reason": join.to_string()}))).into_response()
        }
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .route("/v1/normalize", post(normalize_route))
        .route("/v1/agreement", post(agreement_route))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await { tracing::warn!(error = %e, "ctrl-c handler unavailable"); }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,concord_router=debug,concord_engine=debug".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .init();

    let prom = PrometheusBuilder::new().install_recorder()?;
    let base = AgreementConfig::from_env()?;
    tracing::info!(model = %base.embed_model, endpoint = ?base.embed_endpoint, "agreement defaults loaded");

    let addr: SocketAddr = match std::env::var("CONCORD_ADDR") {
        Ok(s) => s.parse()?,
        Err(_) => SocketAddr::from(([0, 0, 0, 0], 7443)),
    };
    tracing::info!(%addr, "router listening");
    let state = AppState { base: Arc::new(base), prom };
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app(state)).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
