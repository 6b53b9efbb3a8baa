//! DuckDuckGo search provider
//!
//! Text results come from the HTML endpoint; news results from the JSON
//! endpoint, which needs a `vqd` token scraped from the landing page first.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::{NewsHit, SearchError, SearchProvider, TextHit, TimeWindow};
use crate::config::SearchConfig;

const HTML_URL: &str = "https://html.duckduckgo.com/html/";
const LANDING_URL: &str = "https://duckduckgo.com/";
const NEWS_URL: &str = "https://duckduckgo.com/news.js";
const USER_AGENT: &str = concat!("veille/", env!("CARGO_PKG_VERSION"));

static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#)
        .expect("valid result link regex")
});

static RESULT_SNIPPET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#)
        .expect("valid snippet regex")
});

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

static VQD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"vqd=["']?([0-9-]+)"#).expect("valid vqd regex")
});

pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new(timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    async fn vqd_token(&self, query: &str) -> Result<String, SearchError> {
        let response = self
            .client
            .get(LANDING_URL)
            .query(&[("q", query)])
            .send()
            .await?;
        let body = checked_body(response).await?;
        extract_vqd(&body)
            .ok_or_else(|| SearchError::Parse("no vqd token in landing page".to_string()))
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn text(
        &self,
        query: &str,
        region: &str,
        max_results: usize,
    ) -> Result<Vec<TextHit>, SearchError> {
        let response = self
            .client
            .post(HTML_URL)
            .form(&[("q", query), ("kl", region)])
            .send()
            .await?;
        let body = checked_body(response).await?;

        let mut hits = parse_html_results(&body);
        hits.truncate(max_results);
        Ok(hits)
    }

    async fn news(
        &self,
        query: &str,
        region: &str,
        window: TimeWindow,
        max_results: usize,
    ) -> Result<Vec<NewsHit>, SearchError> {
        let vqd = self.vqd_token(query).await?;
        let response = self
            .client
            .get(NEWS_URL)
            .query(&[
                ("o", "json"),
                ("noamp", "1"),
                ("l", region),
                ("q", query),
                ("vqd", vqd.as_str()),
                ("p", "-1"),
                ("df", window.code()),
            ])
            .send()
            .await?;
        let body = checked_body(response).await?;

        let mut hits = parse_news_json(&body)?;
        hits.truncate(max_results);
        Ok(hits)
    }
}

const ERROR_EXCERPT_CHARS: usize = 200;

async fn checked_body(response: reqwest::Response) -> Result<String, SearchError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SearchError::Status {
            status: status.as_u16(),
            body: excerpt(&body, ERROR_EXCERPT_CHARS),
        });
    }
    Ok(body)
}

/// First `max_chars` characters of an error page
fn excerpt(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

fn extract_vqd(page: &str) -> Option<String> {
    VQD.captures(page).map(|c| c[1].to_string())
}

/// Parse the HTML endpoint's result list
///
/// Links and snippets are paired by position. Ads carry no snippet link
/// and a `y.js` redirect, so they are skipped.
fn parse_html_results(html: &str) -> Vec<TextHit> {
    let snippets: Vec<String> = RESULT_SNIPPET
        .captures_iter(html)
        .map(|c| clean_text(&c[1]))
        .collect();

    RESULT_LINK
        .captures_iter(html)
        .filter_map(|c| {
            let href = resolve_link(&decode_entities(&c[1]))?;
            Some((href, clean_text(&c[2])))
        })
        .zip(snippets)
        .map(|((href, title), body)| TextHit { title, href, body })
        .collect()
}

/// Unwrap `//duckduckgo.com/l/?uddg=...` redirects to the target URL
fn resolve_link(raw: &str) -> Option<String> {
    let absolute = if raw.starts_with("//") {
        format!("https:{}", raw)
    } else {
        raw.to_string()
    };
    let parsed = url::Url::parse(&absolute).ok()?;

    if parsed.path().starts_with("/y.js") {
        return None;
    }
    if parsed.path().starts_with("/l/") {
        return parsed
            .query_pairs()
            .find(|(k, _)| k == "uddg")
            .map(|(_, v)| v.into_owned());
    }
    Some(absolute)
}

fn clean_text(fragment: &str) -> String {
    let stripped = TAG.replace_all(fragment, "");
    decode_entities(stripped.trim())
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[derive(Debug, Deserialize)]
struct NewsPage {
    #[serde(default)]
    results: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    excerpt: String,
    #[serde(default)]
    date: Option<i64>,
    #[serde(default)]
    source: Option<String>,
}

fn parse_news_json(body: &str) -> Result<Vec<NewsHit>, SearchError> {
    let page: NewsPage =
        serde_json::from_str(body).map_err(|e| SearchError::Parse(e.to_string()))?;

    Ok(page
        .results
        .into_iter()
        .filter(|item| !item.url.is_empty())
        .map(|item| NewsHit {
            title: decode_entities(&item.title),
            url: item.url,
            body: clean_text(&item.excerpt),
            date: item
                .date
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                .map(|d| d.to_rfc3339()),
            source: item.source,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML_FIXTURE: &str = r#"
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.fr%2Fia&amp;rut=abc">L&#x27;<b>intelligence</b> artificielle</a>
  </h2>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.fr%2Fia">Tout sur l&#x27;<b>IA</b> en 2024 &amp; après.</a>
</div>
<div class="result results_links web-result">
  <h2 class="result__title">
    <a rel="nofollow" class="result__a" href="https://direct.example.org/page">Direct</a>
  </h2>
  <a class="result__snippet" href="https://direct.example.org/page">Un lien direct.</a>
</div>
"#;

    #[test]
    fn parses_html_results_and_unwraps_redirects() {
        let hits = parse_html_results(HTML_FIXTURE);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "L'intelligence artificielle");
        assert_eq!(hits[0].href, "https://example.fr/ia");
        assert_eq!(hits[0].body, "Tout sur l'IA en 2024 & après.");
        assert_eq!(hits[1].href, "https://direct.example.org/page");
        assert_eq!(hits[1].body, "Un lien direct.");
    }

    #[tokio::test]
    async fn error_page_with_accents_becomes_status_error() {
        // 'é' straddles byte 200
        let page = format!("{}é indisponible, réessayez plus tard", "a".repeat(199));
        let response: reqwest::Response = axum::http::Response::builder()
            .status(503)
            .body(page)
            .unwrap()
            .into();

        match checked_body(response).await {
            Err(SearchError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body.chars().count(), ERROR_EXCERPT_CHARS);
                assert!(body.ends_with("aé"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn excerpt_keeps_short_bodies_whole() {
        assert_eq!(excerpt("Service indisponible", 200), "Service indisponible");
        assert_eq!(excerpt("déjà", 2), "dé");
    }

    #[test]
    fn empty_page_has_no_results() {
        assert!(parse_html_results("<html><body>No results.</body></html>").is_empty());
    }

    #[test]
    fn ad_redirects_are_dropped() {
        assert_eq!(resolve_link("//duckduckgo.com/y.js?ad_domain=x"), None);
    }

    #[test]
    fn extracts_vqd_token() {
        let page = r#"<script>DDG.deep.initialize('/d.js?q=x&vqd=4-1234567890&l=fr-fr');</script>"#;
        assert_eq!(extract_vqd(page).as_deref(), Some("4-1234567890"));
        assert_eq!(extract_vqd("nothing here"), None);
    }

    #[test]
    fn parses_news_json() {
        let body = r#"{
            "results": [
                {"title": "Renault &amp; Dacia", "url": "https://news.example.fr/a",
                 "excerpt": "Les <b>ventes</b> progressent", "date": 1730358120,
                 "source": "Le Journal"},
                {"title": "sans url", "url": "", "excerpt": "ignored"}
            ]
        }"#;
        let hits = parse_news_json(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Renault & Dacia");
        assert_eq!(hits[0].body, "Les ventes progressent");
        assert_eq!(hits[0].date.as_deref(), Some("2024-10-31T07:02:00+00:00"));
        assert_eq!(hits[0].source.as_deref(), Some("Le Journal"));
    }

    #[test]
    fn malformed_news_json_is_a_parse_error() {
        assert!(matches!(
            parse_news_json("<html>"),
            Err(SearchError::Parse(_))
        ));
    }
}
