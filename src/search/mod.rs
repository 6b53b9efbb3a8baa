//! Web search: provider abstraction and the search tool used by the Search stage
//!
//! The tool turns a query into one flat text block the models can read:
//!
//! ```text
//! Title: {title}
//! URL: {url}
//! Description: {snippet}
//!
//! Title: ...
//! ```

mod duckduckgo;

pub use duckduckgo::DuckDuckGoProvider;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{SearchConfig, SearchMode};

/// Failures from a search provider
///
/// An empty result set is not an error; see [`SearchTool::search`].
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected search response: {0}")]
    Parse(String),
}

/// Raw record from a text search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextHit {
    pub title: String,
    pub href: String,
    pub body: String,
}

/// Raw record from a news search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsHit {
    pub title: String,
    pub url: String,
    pub body: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Provider-neutral result record, in relevance order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRecord {
    pub title: String,
    pub locator: String,
    pub snippet: String,
}

impl From<TextHit> for SearchRecord {
    fn from(hit: TextHit) -> Self {
        Self {
            title: hit.title,
            locator: hit.href,
            snippet: hit.body,
        }
    }
}

impl From<NewsHit> for SearchRecord {
    fn from(hit: NewsHit) -> Self {
        Self {
            title: hit.title,
            locator: hit.url,
            snippet: hit.body,
        }
    }
}

/// Recency filter for news searches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    Year,
}

impl TimeWindow {
    /// Single-letter code used by DuckDuckGo's `df` parameter
    pub fn code(&self) -> &'static str {
        match self {
            TimeWindow::Day => "d",
            TimeWindow::Week => "w",
            TimeWindow::Month => "m",
            TimeWindow::Year => "y",
        }
    }
}

/// A web search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn text(
        &self,
        query: &str,
        region: &str,
        max_results: usize,
    ) -> Result<Vec<TextHit>, SearchError>;

    async fn news(
        &self,
        query: &str,
        region: &str,
        window: TimeWindow,
        max_results: usize,
    ) -> Result<Vec<NewsHit>, SearchError>;
}

type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Formats queries, calls the provider and renders the results
///
/// Immutable after construction and shared by every run.
#[derive(Clone)]
pub struct SearchTool {
    provider: Arc<dyn SearchProvider>,
    mode: SearchMode,
    region: String,
    max_results: usize,
    clock: Clock,
}

impl SearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, config: &SearchConfig) -> Self {
        Self {
            provider,
            mode: config.mode,
            region: config.region.clone(),
            max_results: config.max_results,
            clock: Arc::new(Local::now),
        }
    }

    /// Replace the wall clock used for the recency token
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Local> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Query string actually sent to the provider
    pub fn provider_query(&self, query: &str) -> String {
        match self.mode {
            SearchMode::Text => format!("{} {}", query, recency_token((self.clock)())),
            SearchMode::News => query.to_string(),
        }
    }

    /// Fetch the provider's records for `query`, in relevance order
    pub async fn records(&self, query: &str) -> Result<Vec<SearchRecord>, SearchError> {
        let provider_query = self.provider_query(query);
        tracing::info!(
            "Searching the web ({} mode, {}) for: {}",
            self.mode,
            self.provider.name(),
            provider_query
        );

        let records: Vec<SearchRecord> = match self.mode {
            SearchMode::Text => self
                .provider
                .text(&provider_query, &self.region, self.max_results)
                .await?
                .into_iter()
                .map(SearchRecord::from)
                .collect(),
            SearchMode::News => self
                .provider
                .news(
                    &provider_query,
                    &self.region,
                    TimeWindow::Month,
                    self.max_results,
                )
                .await?
                .into_iter()
                .map(SearchRecord::from)
                .collect(),
        };

        tracing::debug!("Search returned {} records", records.len());
        Ok(records)
    }

    /// Search and render the results as one text block
    ///
    /// No results is not an error: the fixed "nothing found" sentence is
    /// returned instead. Provider failures propagate.
    pub async fn search(&self, query: &str) -> Result<String, SearchError> {
        let records = self.records(query).await?;
        if records.is_empty() {
            tracing::warn!("No search results for: {}", query);
            return Ok(no_results_message(query));
        }
        Ok(render_records(&records))
    }
}

/// Year-month suffix appended to text queries, e.g. `2024-11`
pub fn recency_token(now: DateTime<Local>) -> String {
    now.format("%Y-%m").to_string()
}

/// Fallback returned when the provider finds nothing
pub fn no_results_message(query: &str) -> String {
    format!("N'a pas pu trouver de résultat à propos de {}.", query)
}

/// Render records as blank-line separated blocks, trailing whitespace trimmed
pub fn render_records(records: &[SearchRecord]) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!(
            "Title: {}\nURL: {}\nDescription: {}\n\n",
            record.title, record.locator, record.snippet
        ));
    }
    out.trim_end().to_string()
}

/// Provider returning fixed records; for offline runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSearchProvider {
    pub text_hits: Vec<TextHit>,
    pub news_hits: Vec<NewsHit>,
}

impl StaticSearchProvider {
    pub fn with_text(hits: Vec<TextHit>) -> Self {
        Self {
            text_hits: hits,
            news_hits: Vec::new(),
        }
    }

    pub fn with_news(hits: Vec<NewsHit>) -> Self {
        Self {
            text_hits: Vec::new(),
            news_hits: hits,
        }
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn text(
        &self,
        _query: &str,
        _region: &str,
        max_results: usize,
    ) -> Result<Vec<TextHit>, SearchError> {
        Ok(self.text_hits.iter().take(max_results).cloned().collect())
    }

    async fn news(
        &self,
        _query: &str,
        _region: &str,
        _window: TimeWindow,
        max_results: usize,
    ) -> Result<Vec<NewsHit>, SearchError> {
        Ok(self.news_hits.iter().take(max_results).cloned().collect())
    }
}
