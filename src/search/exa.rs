//! Exa API client.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const EXA_API_URL: &str = "https://api.exa.ai";
const RESEARCH_MODEL: &str = "exa-research";

/// How long to wait for a research task.
#[derive(Debug, Clone)]
pub struct ResearchPoll {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for ResearchPoll {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageContent {
    pub url: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    results: Vec<PageContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResearchResponse {
    research_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResearchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Deserialize)]
struct ResearchOutput {
    #[serde(default)]
    parsed: Option<serde_json::Value>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResearchTask {
    status: ResearchStatus,
    #[serde(default)]
    output: Option<ResearchOutput>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct ExaClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    poll: ResearchPoll,
}

impl ExaClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(EXA_API_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            poll: ResearchPoll::default(),
        }
    }

    pub fn with_poll(mut self, poll: ResearchPoll) -> Self {
        self.poll = poll;
        self
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call Exa {}", path))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Exa {} failed: {} - {}", path, status, text);
        }
        serde_json::from_str(&text).with_context(|| format!("Failed to parse Exa {} response", path))
    }

    /// Keyword search returning up to `num_results` hits.
    pub async fn search(&self, query: &str, num_results: usize) -> anyhow::Result<Vec<SearchResult>> {
        let resp: SearchResponse = self
            .post_json(
                "/search",
                json!({ "query": query, "numResults": num_results, "type": "keyword" }),
            )
            .await?;
        Ok(resp.results)
    }

    /// Page text for the given URLs.
    pub async fn contents(&self, urls: &[String]) -> anyhow::Result<Vec<PageContent>> {
        let resp: ContentsResponse = self
            .post_json("/contents", json!({ "urls": urls, "text": true }))
            .await?;
        Ok(resp.results)
    }

    /// Create a research task and poll it until it finishes.
    ///
    /// Returns the structured output matching `output_schema`, or `None` when
    /// the task completed without one.
    pub async fn research(
        &self,
        instructions: &str,
        output_schema: &serde_json::Value,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        let created: CreateResearchResponse = self
            .post_json(
                "/research/v1",
                json!({
                    "instructions": instructions,
                    "model": RESEARCH_MODEL,
                    "outputSchema": output_schema,
                }),
            )
            .await?;
        tracing::info!("Created Exa research task with ID: {}", created.research_id);

        let url = format!("{}/research/v1/{}", self.base_url, created.research_id);
        for attempt in 0..self.poll.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.poll.interval).await;
            }

            let resp = self
                .client
                .get(&url)
                .header("x-api-key", &self.api_key)
                .send()
                .await
                .context("Failed to poll Exa research task")?;
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                anyhow::bail!("Exa research poll failed: {} - {}", status, text);
            }
            let task: ResearchTask =
                serde_json::from_str(&text).context("Failed to parse Exa research task")?;

            match task.status {
                ResearchStatus::Pending | ResearchStatus::Running => continue,
                ResearchStatus::Completed => {
                    tracing::debug!("Exa research task {} completed", created.research_id);
                    return Ok(task.output.and_then(ResearchOutput::into_value));
                }
                ResearchStatus::Failed | ResearchStatus::Canceled => {
                    anyhow::bail!(
                        "Exa research task {} did not complete: {}",
                        created.research_id,
                        task.error.unwrap_or_else(|| "no error reported".to_string())
                    );
                }
            }
        }

        anyhow::bail!(
            "Exa research task {} still running after {} polls",
            created.research_id,
            self.poll.max_attempts
        )
    }
}

impl ResearchOutput {
    /// Prefer the parsed output; fall back to JSON embedded in the text.
    fn into_value(self) -> Option<serde_json::Value> {
        self.parsed.or_else(|| {
            self.content
                .and_then(|c| serde_json::from_str(crate::llm::extract_json(&c)).ok())
        })
    }
}
