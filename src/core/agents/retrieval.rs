//! Knowledge-retrieval collaborator
//!
//! Returns passages relevant to a caller question from the business's
//! ingested knowledge base. Failures degrade to an empty result at the
//! orchestration boundary, so the reply falls back to the business profile.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AgentResult;

const DEFAULT_RESULT_COUNT: u32 = 5;

/// Retrieval collaborator contract
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Ordered relevant passages for a query; possibly empty.
    async fn retrieve(&self, business_id: Uuid, query: &str) -> AgentResult<Vec<String>>;
}

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    business_id: Uuid,
    query: &'a str,
    n_results: u32,
}

#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    passages: Vec<String>,
}

/// HTTP client for the retrieval service
pub struct HttpRetriever {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpRetriever {
    async fn retrieve(&self, business_id: Uuid, query: &str) -> AgentResult<Vec<String>> {
        let response = self
            .client
            .post(format!("{}/retrieve", self.base_url))
            .json(&RetrieveRequest {
                business_id,
                query,
                n_results: DEFAULT_RESULT_COUNT,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<RetrieveResponse>()
            .await?;
        Ok(response.passages)
    }
}

/// Stand-in when no retrieval service is configured: every query retrieves
/// nothing, and replies fall back to the business profile.
pub struct NullRetriever;

#[async_trait]
impl KnowledgeRetriever for NullRetriever {
    async fn retrieve(&self, _business_id: Uuid, _query: &str) -> AgentResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Join retrieved passages into one context block; empty when nothing was
/// retrieved so the caller can skip the section entirely.
pub fn join_passages(passages: &[String]) -> Option<String> {
    if passages.is_empty() {
        None
    } else {
        Some(passages.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_passages_empty_is_none() {
        assert_eq!(join_passages(&[]), None);
    }

    #[test]
    fn test_join_passages_double_newline_separated() {
        let passages = vec!["first".to_string(), "second".to_string()];
        assert_eq!(join_passages(&passages).as_deref(), Some("first\n\nsecond"));
    }
}
