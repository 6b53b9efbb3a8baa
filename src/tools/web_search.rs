//! `web_search` tool: exposes [`SearchTool`] to the Search stage

use super::{Tool, ToolResult};
use crate::search::SearchTool;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct WebSearchTool {
    search: Arc<SearchTool>,
}

impl WebSearchTool {
    pub const NAME: &'static str = "web_search";

    pub fn new(search: Arc<SearchTool>) -> Self {
        Self { search }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Recherche sur le Web. Renvoie, pour chaque résultat, le titre, l'URL et un court extrait."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Les mots-clés à rechercher"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<ToolResult> {
        let query = match params.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim(),
            _ => return Ok(ToolResult::error("Missing required parameter: query")),
        };

        let output = self.search.search(query).await?;
        Ok(ToolResult::success(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::search::{StaticSearchProvider, TextHit};

    fn tool() -> WebSearchTool {
        let provider = StaticSearchProvider::with_text(vec![TextHit {
            title: "IA".to_string(),
            href: "http://x".to_string(),
            body: "résumé".to_string(),
        }]);
        WebSearchTool::new(Arc::new(SearchTool::new(
            Arc::new(provider),
            &SearchConfig::default(),
        )))
    }

    #[tokio::test]
    async fn returns_rendered_results() {
        let result = tool()
            .execute(json!({"query": "intelligence artificielle"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Title: IA\nURL: http://x\nDescription: résumé");
    }

    #[tokio::test]
    async fn missing_query_is_reported_to_the_model() {
        let result = tool().execute(json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("query"));
    }
}
