use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::cli::SearchBackend;
use crate::config::{Credentials, RuntimeConfig};

pub const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Web search backend.
///
/// `search` never fails: missing credentials, network errors and empty
/// result sets all come back as a readable string that is handed to the
/// model as-is.
#[async_trait]
pub trait WebSearch: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn search(&self, query: &str) -> String;
}

/// `auto` picks Serper when a key is configured and the simulated backend
/// otherwise.
pub fn resolve_search_backend(cfg: &RuntimeConfig, creds: &Credentials) -> SearchBackend {
    match cfg.search_backend {
        SearchBackend::Auto if creds.serper_api_key.is_some() => SearchBackend::Serper,
        SearchBackend::Auto => SearchBackend::Simulated,
        other => other,
    }
}

pub fn build_search(cfg: &RuntimeConfig, creds: &Credentials) -> Result<Arc<dyn WebSearch>> {
    match resolve_search_backend(cfg, creds) {
        SearchBackend::Serper => Ok(Arc::new(SerperSearch::new(
            creds.serper_api_key.clone(),
            SERPER_ENDPOINT.to_string(),
            cfg.search_max_results,
            Duration::from_secs(cfg.search_timeout_secs),
        )?)),
        SearchBackend::Simulated | SearchBackend::Auto => Ok(Arc::new(SimulatedSearch::default())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

pub struct SerperSearch {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    max_results: usize,
}

impl SerperSearch {
    pub fn new(
        api_key: Option<String>,
        endpoint: String,
        max_results: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build search HTTP client")?;
        Ok(Self {
            client,
            api_key,
            endpoint,
            max_results: max_results.max(1),
        })
    }

    async fn fetch(&self, api_key: &str, query: &str) -> Result<SerperResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": query, "num": self.max_results }))
            .send()
            .await
            .context("request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP {status}"));
        }

        response
            .json::<SerperResponse>()
            .await
            .context("unexpected response body")
    }
}

#[async_trait]
impl WebSearch for SerperSearch {
    fn backend_name(&self) -> &'static str {
        "serper"
    }

    async fn search(&self, query: &str) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("web search skipped: SERPER_API_KEY is not set");
            return "Web search unavailable: SERPER_API_KEY is not configured.".to_string();
        };

        match self.fetch(api_key, query).await {
            Ok(response) => {
                let answer = response.answer_box.as_ref().and_then(AnswerBox::summary);
                let hits = response
                    .organic
                    .into_iter()
                    .filter_map(OrganicResult::into_hit)
                    .take(self.max_results)
                    .collect::<Vec<SearchHit>>();
                tracing::info!(hits = hits.len(), "web search completed");
                format_search_results(query, answer.as_deref(), &hits)
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "web search failed");
                format!("Web search failed: {err:#}")
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SerperResponse {
    answer_box: Option<AnswerBox>,
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct AnswerBox {
    title: Option<String>,
    answer: Option<String>,
    snippet: Option<String>,
}

impl AnswerBox {
    fn summary(&self) -> Option<String> {
        let body = self
            .answer
            .as_deref()
            .or(self.snippet.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())?;
        match self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => Some(format!("{title}: {body}")),
            None => Some(body.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

impl OrganicResult {
    fn into_hit(self) -> Option<SearchHit> {
        let link = self.link.filter(|link| !link.trim().is_empty())?;
        Some(SearchHit {
            title: self.title.unwrap_or_else(|| link.clone()),
            snippet: self.snippet.unwrap_or_default(),
            link,
        })
    }
}

pub fn format_search_results(query: &str, answer: Option<&str>, hits: &[SearchHit]) -> String {
    if answer.is_none() && hits.is_empty() {
        return format!("No web results found for \"{query}\".");
    }

    let mut out = format!("Web results for \"{query}\":\n");
    if let Some(answer) = answer {
        out.push_str(&format!("Answer: {answer}\n"));
    }
    for (index, hit) in hits.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", index + 1, hit.title.trim()));
        if !hit.snippet.trim().is_empty() {
            out.push_str(&format!("   {}\n", hit.snippet.trim()));
        }
        out.push_str(&format!("   Source: {}\n", hit.link.trim()));
    }
    out.trim_end().to_string()
}

/// Canned results for running without a search API key.
pub struct SimulatedSearch {
    pub latency: Duration,
}

impl Default for SimulatedSearch {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl WebSearch for SimulatedSearch {
    fn backend_name(&self) -> &'static str {
        "simulated"
    }

    async fn search(&self, query: &str) -> String {
        tokio::time::sleep(self.latency).await;
        format!(
            "SIMULATED_SEARCH_RESULTS_FOR: {query}\n- SourceA: summary line 1\n- SourceB: summary line 2"
        )
    }
}
