//! HTTP server for article generation

use crate::config::Config;
use crate::orchestration::{ArticlePipeline, PipelineError};
use crate::presenter::{ArticleSession, ChannelRenderer, RenderOutcome};
use anyhow::Result;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tower_http::cors::{Any, CorsLayer};

/// What `/health` reports about the deployment
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub provider: String,
    pub model: String,
    pub mode: String,
    pub strategy: String,
}

impl ServiceInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider: config.llm.provider.clone(),
            model: config.llm.model.clone(),
            mode: config.search.mode.to_string(),
            strategy: config.pipeline.search_strategy.as_str().to_string(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pipeline: Arc<ArticlePipeline>,
    /// Held for the whole run, so runs are serialized
    session: Arc<Mutex<ArticleSession>>,
    info: ServiceInfo,
}

impl AppState {
    pub fn new(pipeline: Arc<ArticlePipeline>, info: ServiceInfo) -> Self {
        Self {
            pipeline,
            session: Arc::new(Mutex::new(ArticleSession::new())),
            info,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArticleRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    #[serde(flatten)]
    info: ServiceInfo,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/article", post(generate_article))
        .route("/session", get(get_session))
        .route("/clear", post(clear_session))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_http_server(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        info: state.info.clone(),
    })
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<ArticleSession> {
    Json(state.session.lock().await.clone())
}

async fn clear_session(State(state): State<Arc<AppState>>) -> Json<ArticleSession> {
    let mut session = state.session.lock().await;
    session.clear();
    tracing::info!("Session cleared");
    Json(session.clone())
}

fn error_response(err: &PipelineError) -> Response {
    let status = if err.is_user_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            stage: err.stage().map(|s| s.to_string()),
        }),
    )
        .into_response()
}

/// Run the pipeline and stream the article as plain text
///
/// Search and Synthesize failures are reported with a status code. Once
/// the body has started, a broken Write stream aborts the body instead of
/// ending it cleanly.
async fn generate_article(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ArticleRequest>,
) -> Response {
    let query = request.query.trim().to_string();
    if query.is_empty() {
        return error_response(&PipelineError::EmptyQuery);
    }

    let mut session = state.session.clone().lock_owned().await;
    let run = match session.start(&state.pipeline, &query).await {
        Ok(run) => run,
        Err(e) => {
            tracing::error!("Article run failed: {}", e);
            return error_response(&e);
        }
    };
    tracing::info!(run = %run.id, "Streaming article for: {}", query);

    let (tx, rx) = futures::channel::mpsc::unbounded::<String>();
    let (outcome_tx, outcome_rx) = oneshot::channel::<Option<String>>();
    let pipeline = state.pipeline.clone();

    tokio::spawn(async move {
        let mut renderer = ChannelRenderer::new(tx);
        let outcome = session
            .consume(run.into_stream(), pipeline.interrupt(), &mut renderer)
            .await;
        drop(renderer);
        let failure = match outcome {
            RenderOutcome::Complete(_) => None,
            RenderOutcome::Incomplete { error, .. } => Some(error.to_string()),
        };
        let _ = outcome_tx.send(failure);
    });

    let tail = stream::once(outcome_rx).filter_map(|outcome| async move {
        match outcome {
            Ok(None) => None,
            Ok(Some(failure)) => Some(Err(std::io::Error::other(failure))),
            Err(_) => Some(Err(std::io::Error::other("article task ended unexpectedly"))),
        }
    });
    let body = rx.map(Ok::<_, std::io::Error>).chain(tail);

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}
