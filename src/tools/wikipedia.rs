//! Wikipedia search returning short article summaries.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{MeetprepError, Result};
use crate::tool::{required_str, Tool};

const MAX_ARTICLES: usize = 5;
const SUMMARY_CHARS: usize = 500;
const USER_AGENT: &str = "meetprep/0.1 (meeting preparation assistant)";

#[derive(Clone)]
pub struct WikipediaSearchTool {
    http: reqwest::Client,
    endpoint: String,
}

impl WikipediaSearchTool {
    /// `endpoint` is a MediaWiki `api.php` URL.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    async fn get_json(&self, params: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(params)
            .send()
            .await
            .map_err(|err| MeetprepError::tool("search_wikipedia", err))?;
        if !resp.status().is_success() {
            return Err(MeetprepError::Protocol(format!(
                "wikipedia request failed with {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|err| MeetprepError::tool("search_wikipedia", err))
    }

    async fn search_titles(&self, query: &str) -> Result<Vec<String>> {
        let limit = MAX_ARTICLES.to_string();
        let body = self
            .get_json(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", &limit),
                ("format", "json"),
            ])
            .await?;
        Ok(body["query"]["search"]
            .as_array()
            .map(|hits| {
                hits.iter()
                    .filter_map(|hit| hit["title"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn summary(&self, title: &str) -> Result<String> {
        let body = self
            .get_json(&[
                ("action", "query"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
                ("format", "json"),
            ])
            .await?;
        let extract = body["query"]["pages"]
            .as_object()
            .and_then(|pages| pages.values().next())
            .and_then(|page| page["extract"].as_str())
            .unwrap_or_default();
        Ok(extract.to_string())
    }

    pub async fn search(&self, query: &str) -> Result<String> {
        let titles = self.search_titles(query).await?;
        if titles.is_empty() {
            return Ok("No relevant Wikipedia articles found.".to_string());
        }

        let mut summaries = Vec::with_capacity(titles.len());
        for title in titles {
            let extract = self.summary(&title).await?;
            summaries.push(format!("**{title}**: {}...", truncate_chars(&extract, SUMMARY_CHARS)));
        }
        Ok(summaries.join("\n\n"))
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Tool for WikipediaSearchTool {
    fn name(&self) -> &str {
        "search_wikipedia"
    }

    fn description(&self) -> &str {
        "Search Wikipedia for relevant articles and return their summaries."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Topic to search on Wikipedia"}
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = required_str(&input, "query", "search_wikipedia")?;
        let summaries = self.search(query).await?;
        Ok(json!({ "query": query, "summaries": summaries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("Hà Nội", 2), "Hà");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[tokio::test]
    async fn builds_truncated_summaries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("list", "search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"search": [{"title": "Rust (programming language)"}]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("prop", "extracts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": {"1": {"extract": "x".repeat(800)}}}
            })))
            .mount(&server)
            .await;

        let tool = WikipediaSearchTool::new(server.uri());
        let text = tool.search("rust").await.unwrap();

        assert!(text.starts_with("**Rust (programming language)**: "));
        assert!(text.ends_with("..."));
        assert_eq!(text.matches('x').count(), SUMMARY_CHARS);
    }

    #[tokio::test]
    async fn reports_no_hits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"search": []}
            })))
            .mount(&server)
            .await;

        let tool = WikipediaSearchTool::new(server.uri());
        assert_eq!(
            tool.search("zzzz").await.unwrap(),
            "No relevant Wikipedia articles found."
        );
    }
}
