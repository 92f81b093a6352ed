//! Web search through the Serper Google Search API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SearchConfig;
use crate::error::{MeetprepError, Result};
use crate::tool::{required_str, Tool};

const MAX_RESULTS: u64 = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SearchResult>,
}

#[derive(Clone)]
pub struct SerperSearchTool {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl SerperSearchTool {
    pub fn from_config(cfg: &SearchConfig) -> Result<Self> {
        let api_key = cfg
            .serper_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| MeetprepError::Config("missing SERPER_API_KEY".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|err| MeetprepError::tool("web_search", err))?;
        Ok(Self {
            http,
            api_key,
            endpoint: cfg.serper_endpoint.clone(),
            max_results: cfg.max_results.max(1),
        })
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": limit }))
            .send()
            .await
            .map_err(|err| MeetprepError::tool("web_search", err))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(MeetprepError::Protocol(format!(
                "serper search failed with {status}: {body}"
            )));
        }

        let parsed: SerperResponse = resp
            .json()
            .await
            .map_err(|err| MeetprepError::tool("web_search", err))?;
        Ok(parsed.organic.into_iter().take(limit).collect())
    }
}

#[async_trait]
impl Tool for SerperSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the internet for recent information about a company, market or topic."
    }

    fn parameters(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Search query"},
                "max_results": {"type": "integer", "description": "Number of results (optional)"}
            },
            "required": ["query"]
        }))
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = required_str(&input, "query", "web_search")?;
        let limit = input
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n.clamp(1, MAX_RESULTS) as usize)
            .unwrap_or(self.max_results);
        let results = self.search(query, limit).await?;
        Ok(json!({ "query": query, "results": results }))
    }
}
