//! Web-search collaborator
//!
//! Thin client for the Serper search API. An unconfigured key and an empty
//! result set both produce explicit sentinel strings so the caller always
//! hears something sensible.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::AgentResult;

pub const NOT_CONFIGURED: &str = "Web search is not configured.";
pub const NO_RESULTS: &str = "No search results found.";

const SERPER_URL: &str = "https://google.serper.dev/search";
const RESULT_LIMIT: usize = 3;

/// Web-search collaborator contract
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Short text summary, or one of the sentinel strings.
    async fn search(&self, query: &str) -> AgentResult<String>;
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// Serper-backed web search
pub struct SerperSearch {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl SerperSearch {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn summarize(response: &SerperResponse) -> String {
        let results: Vec<String> = response
            .organic
            .iter()
            .take(RESULT_LIMIT)
            .map(|r| format!("{}: {}", r.title, r.snippet))
            .collect();
        if results.is_empty() {
            NO_RESULTS.to_string()
        } else {
            results.join("\n")
        }
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str) -> AgentResult<String> {
        let Some(api_key) = &self.api_key else {
            return Ok(NOT_CONFIGURED.to_string());
        };

        let response = self
            .client
            .post(SERPER_URL)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": query, "num": RESULT_LIMIT }))
            .send()
            .await?
            .error_for_status()?
            .json::<SerperResponse>()
            .await?;

        Ok(Self::summarize(&response))
    }
}
