//! HTTP surface against a scripted engine

#![cfg(feature = "test-sim")]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use veille_cli::config::{Config, PipelineConfig, SearchConfig};
use veille_cli::llm::ScriptedProvider;
use veille_cli::orchestration::ArticlePipeline;
use veille_cli::search::{
    NewsHit, SearchError, SearchProvider, SearchTool, StaticSearchProvider, TextHit, TimeWindow,
};
use veille_cli::transport::http::router;
use veille_cli::transport::{AppState, ServiceInfo};

/// Search backend that is down
struct UnavailableSearch;

#[async_trait]
impl SearchProvider for UnavailableSearch {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn text(&self, _: &str, _: &str, _: usize) -> Result<Vec<TextHit>, SearchError> {
        Err(SearchError::Status {
            status: 503,
            body: "Service indisponible".to_string(),
        })
    }

    async fn news(
        &self,
        _: &str,
        _: &str,
        _: TimeWindow,
        _: usize,
    ) -> Result<Vec<NewsHit>, SearchError> {
        Err(SearchError::Status {
            status: 503,
            body: "Service indisponible".to_string(),
        })
    }
}

async fn serve(provider: Arc<ScriptedProvider>) -> String {
    let search = StaticSearchProvider::with_text(vec![TextHit {
        title: "IA".to_string(),
        href: "http://x".to_string(),
        body: "résumé".to_string(),
    }]);
    serve_with_search(provider, Arc::new(search)).await
}

async fn serve_with_search(
    provider: Arc<ScriptedProvider>,
    search: Arc<dyn SearchProvider>,
) -> String {
    let search = SearchTool::new(search, &SearchConfig::default());
    let pipeline = ArticlePipeline::new(provider, Arc::new(search), &PipelineConfig::default());

    let mut config = Config::default();
    config.llm.provider = "scripted".to_string();
    let state = Arc::new(AppState::new(
        Arc::new(pipeline),
        ServiceInfo::from_config(&config),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn health_reports_deployment() {
    let base = serve(Arc::new(ScriptedProvider::new())).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider"], "scripted");
    assert_eq!(body["mode"], "text");
    assert_eq!(body["model"], "aya-expanse:8b-q8_0");
}

#[tokio::test]
async fn article_streams_and_updates_session() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_text("résultats").push_text("notes");
    provider.push_stream(["Titre\n", "Corps de l'article"]);
    let base = serve(provider).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/article", base))
        .json(&json!({"query": "intelligence artificielle"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(response.text().await.unwrap(), "Titre\nCorps de l'article");

    let session: Value = client
        .get(format!("{}/session", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["query"], "intelligence artificielle");
    assert_eq!(session["article"], "Titre\nCorps de l'article");

    let cleared: Value = client
        .post(format!("{}/clear", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared, json!({"query": "", "article": ""}));
}

#[tokio::test]
async fn blank_query_is_a_bad_request() {
    let base = serve(Arc::new(ScriptedProvider::new())).await;
    let response = reqwest::Client::new()
        .post(format!("{}/article", base))
        .json(&json!({"query": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn engine_failure_is_a_bad_gateway() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_failure("model not loaded");
    let base = serve(provider).await;

    let response = reqwest::Client::new()
        .post(format!("{}/article", base))
        .json(&json!({"query": "voitures"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stage"], "search");
    assert!(body["error"].as_str().unwrap().contains("model not loaded"));
}

#[tokio::test]
async fn search_backend_failure_is_a_bad_gateway() {
    let provider = Arc::new(ScriptedProvider::new());
    let base = serve_with_search(provider.clone(), Arc::new(UnavailableSearch)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/article", base))
        .json(&json!({"query": "voitures"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stage"], "search");
    assert!(body["error"].as_str().unwrap().contains("503"));
    assert!(provider.events().is_empty());

    let session: Value = client
        .get(format!("{}/session", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session, json!({"query": "", "article": ""}));
}
