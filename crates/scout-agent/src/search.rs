//! `search_agent` executor: asks an LLM for curated, actionable findings
//! about a search query and validates the reply into a [`SearchResult`].

use std::sync::Arc;

use async_trait::async_trait;
use scout_scheduler::{Executor, ExecutorError, LockedJob};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::prompt::{render, PromptLoader};
use crate::provider::{ChatRequest, LlmProvider, Message};

/// Job kind handled by [`SearchExecutor`].
pub const SEARCH_AGENT_KIND: &str = "search_agent";

/// Sources a search may target.
pub const SUPPORTED_SOURCES: &[&str] = &["reddit"];

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a research agent. Your mission: {behavior}

Search the requested sources for content matching the user's query and keep
only findings with specific tactics and measurable outcomes. Skip vague,
promotional, off-topic or outdated material. Aim for at least {min_results}
findings.

Reply with a single JSON object and nothing else:
{
  \"findings\": [
    {
      \"source\": \"reddit\",
      \"source_id\": \"<platform id>\",
      \"title\": \"<original title>\",
      \"summary\": \"<2-3 sentences: what worked and the results>\",
      \"action_items\": [\"<up to 3 tactics, each starting with a verb>\"],
      \"relevance_score\": 0.0
    }
  ],
  \"metadata\": {
    \"total_searches\": 1,
    \"filtering_stats\": { \"accepted\": 0, \"rejected\": 0 },
    \"confidence\": 0.0
  }
}";

/// Payload of a `search_agent` job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCommand {
    /// Mission statement steering the agent's tone and approach.
    pub behavior: String,
    /// Keyword or phrase the search starts from.
    pub search_query: String,
    pub search_types: Vec<String>,
    #[serde(default = "default_min_results")]
    pub min_results: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_min_results() -> u32 {
    5
}
fn default_max_tokens() -> u32 {
    4000
}

impl SearchCommand {
    /// Parse and check a configuration payload. Any error here is a
    /// configuration defect, not a transient failure.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, String> {
        let cmd: SearchCommand =
            serde_json::from_value(payload.clone()).map_err(|e| e.to_string())?;
        if cmd.search_query.trim().is_empty() {
            return Err("search_query must not be empty".into());
        }
        if cmd.search_types.is_empty() {
            return Err("search_types must name at least one source".into());
        }
        if let Some(unknown) = cmd
            .search_types
            .iter()
            .find(|t| !SUPPORTED_SOURCES.contains(&t.as_str()))
        {
            return Err(format!("unsupported search type '{unknown}'"));
        }
        if cmd.min_results == 0 {
            return Err("min_results must be at least 1".into());
        }
        if cmd.max_tokens < 1000 {
            return Err("max_tokens must be at least 1000".into());
        }
        Ok(cmd)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub action_items: Vec<String>,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteringStats {
    pub accepted: u32,
    pub rejected: u32,
    #[serde(default)]
    pub low_quality: u32,
    #[serde(default)]
    pub off_topic: u32,
    #[serde(default)]
    pub promotional: u32,
    #[serde(default)]
    pub too_old: u32,
    #[serde(default)]
    pub no_specifics: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub total_searches: u32,
    pub filtering_stats: FilteringStats,
    pub confidence: f64,
}

/// Success payload stored in `success_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub metadata: SearchMetadata,
}

impl SearchResult {
    /// Parse an LLM reply: the JSON object may be wrapped in prose or a
    /// markdown code fence.
    pub fn from_reply(reply: &str) -> Result<Self, String> {
        let json = extract_json_object(reply).ok_or("reply contains no JSON object")?;
        let result: SearchResult =
            serde_json::from_str(json).map_err(|e| format!("malformed search result: {e}"))?;
        result.validate()?;
        Ok(result)
    }

    fn validate(&self) -> Result<(), String> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.metadata.confidence) {
            return Err(format!(
                "confidence {} outside [0, 1]",
                self.metadata.confidence
            ));
        }
        if let Some(f) = self
            .findings
            .iter()
            .find(|f| !unit.contains(&f.relevance_score))
        {
            return Err(format!(
                "relevance_score {} of finding '{}' outside [0, 1]",
                f.relevance_score, f.source_id
            ));
        }
        if let Some(f) = self
            .findings
            .iter()
            .find(|f| !SUPPORTED_SOURCES.contains(&f.source.as_str()))
        {
            return Err(format!(
                "finding '{}' has unsupported source '{}'",
                f.source_id, f.source
            ));
        }
        Ok(())
    }
}

/// Outermost `{ ... }` span of `text`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Runs `search_agent` jobs against an [`LlmProvider`].
pub struct SearchExecutor {
    provider: Arc<dyn LlmProvider>,
    prompts: PromptLoader,
    model: String,
    /// Upper bound for the per-job `max_tokens`.
    max_tokens: u32,
    temperature: Option<f64>,
}

impl SearchExecutor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        prompts: PromptLoader,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            prompts,
            model: model.into(),
            max_tokens,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_request(&self, cmd: &SearchCommand) -> ChatRequest {
        let template = self
            .prompts
            .load_or(SEARCH_AGENT_KIND, "system", DEFAULT_SYSTEM_PROMPT);
        let min_results = cmd.min_results.to_string();
        let system = render(
            &template,
            &[("behavior", cmd.behavior.as_str()), ("min_results", min_results.as_str())],
        );

        ChatRequest {
            model: self.model.clone(),
            system,
            messages: vec![Message::user(format!(
                "{}\n\nSources: {}",
                cmd.search_query,
                cmd.search_types.join(", ")
            ))],
            max_tokens: cmd.max_tokens.min(self.max_tokens),
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl Executor for SearchExecutor {
    async fn execute(&self, job: &LockedJob) -> Result<serde_json::Value, ExecutorError> {
        let cmd = SearchCommand::from_payload(&job.config.payload).map_err(|reason| {
            ExecutorError::InvalidPayload {
                kind: job.kind().to_string(),
                reason,
            }
        })?;

        let req = self.build_request(&cmd);
        debug!(
            provider = self.provider.name(),
            model = %req.model,
            query = %cmd.search_query,
            "running search agent"
        );

        let resp = self
            .provider
            .send(&req)
            .await
            .map_err(|e| ExecutorError::ExecutionFailed(e.to_string()))?;

        let result = SearchResult::from_reply(&resp.content)
            .map_err(ExecutorError::ExecutionFailed)?;
        info!(
            findings = result.findings.len(),
            min_results = cmd.min_results,
            tokens_in = resp.tokens_in,
            tokens_out = resp.tokens_out,
            "search agent finished"
        );

        serde_json::to_value(&result).map_err(|e| ExecutorError::ExecutionFailed(e.to_string()))
    }
}
