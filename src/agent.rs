//! Decide, optionally search, then synthesize an answer while reporting every
//! step as a [`StreamEvent`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::event::{EventSink, StreamEvent};
use crate::provider::CompletionModel;
use crate::search::WebSearch;

pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const SEARCH_MARKER: &str = "search";

pub const INTAKE_NOTE: &str = "Analyzing query intent and deciding if external context is needed...";
pub const SEARCH_DECIDED_NOTE: &str = "Decided to fetch live web data for better accuracy.";
pub const NO_SEARCH_NOTE: &str = "No external search required; answering from internal knowledge.";
pub const SYNTHESIS_NOTE: &str = "Synthesizing final response...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub used_search: bool,
    pub fragments: usize,
    pub answer_chars: usize,
}

pub struct SearchAgent {
    model: Arc<dyn CompletionModel>,
    search: Arc<dyn WebSearch>,
}

impl SearchAgent {
    pub fn new(model: Arc<dyn CompletionModel>, search: Arc<dyn WebSearch>) -> Self {
        Self { model, search }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn search_backend(&self) -> &'static str {
        self.search.backend_name()
    }

    /// Runs one query through the pipeline.
    ///
    /// Each event is awaited on `sink` before the next step starts. A model
    /// failure or a closed sink aborts the run; no `response` event is
    /// emitted in that case.
    pub async fn run(&self, query: &str, sink: &dyn EventSink) -> Result<RunSummary> {
        sink.emit(StreamEvent::reasoning(INTAKE_NOTE)).await?;

        let decision = self
            .model
            .complete(&decision_prompt(query))
            .await
            .context("model failed while deciding whether to search")?;
        let used_search = needs_search(&decision);
        tracing::info!(used_search, decision = %decision.trim(), "search decision");

        let search_results = if used_search {
            sink.emit(StreamEvent::reasoning(SEARCH_DECIDED_NOTE)).await?;
            sink.emit(StreamEvent::tool_started(WEB_SEARCH_TOOL, query)).await?;
            let results = self.search.search(query).await;
            sink.emit(StreamEvent::tool_completed(
                WEB_SEARCH_TOOL,
                query,
                results.clone(),
            ))
            .await?;
            Some(results)
        } else {
            sink.emit(StreamEvent::reasoning(NO_SEARCH_NOTE)).await?;
            None
        };

        sink.emit(StreamEvent::reasoning(SYNTHESIS_NOTE)).await?;
        let mut stream = self
            .model
            .complete_stream(&answer_prompt(query, search_results.as_deref()))
            .await
            .context("model failed to start streaming the answer")?;

        let mut streamed = String::new();
        let mut fragments = 0usize;
        while let Some(fragment) = stream.next_fragment().await {
            let fragment = fragment.context("model stream failed mid-answer")?;
            if fragment.is_empty() {
                continue;
            }
            streamed.push_str(&fragment);
            fragments += 1;
            sink.emit(StreamEvent::reasoning(fragment)).await?;
        }

        let answer = stream
            .into_final_text()
            .await
            .context("model failed to finalize the answer")?;
        if answer != streamed {
            tracing::debug!(
                streamed_chars = streamed.len(),
                final_chars = answer.len(),
                "final answer differs from streamed fragments"
            );
        }
        let summary = RunSummary {
            used_search,
            fragments,
            answer_chars: answer.chars().count(),
        };
        sink.emit(StreamEvent::response(answer)).await?;
        Ok(summary)
    }
}

/// True when the classifier's answer mentions the search marker anywhere.
///
/// Matching is a plain substring test after trimming and lower-casing, so
/// "I will not search" also counts as a request to search.
pub fn needs_search(decision: &str) -> bool {
    decision.trim().to_lowercase().contains(SEARCH_MARKER)
}

pub fn decision_prompt(query: &str) -> String {
    format!(
        "You are an AI agent deciding whether to use a web search tool to answer a user query.\n\
\n\
Guidelines:\n\
- Use the web tool for anything involving *real-time*, *recent*, or *factual data* (e.g. current events, latest research, weather, prices, trends, \"today\", \"now\", \"2025\").\n\
- Use your internal knowledge for conceptual, historical, or general reasoning questions.\n\
- Respond ONLY with one word:\n\
  - \"search\" if a web search is needed\n\
  - \"no\" if not needed\n\
\n\
User query: \"{query}\"\n"
    )
}

pub fn answer_prompt(query: &str, search_results: Option<&str>) -> String {
    let context = match search_results {
        Some(results) => format!("You have access to the following search results:\n{results}"),
        None => "You should answer using your own general knowledge (no external search used)."
            .to_string(),
    };
    format!(
        "You are a helpful AI agent answering the user's question.\n\
\n\
User question: {query}\n\
\n\
{context}\n\
\n\
Provide a clear, factual, and concise answer. If you used sources, refer to them naturally (e.g., \"According to Reuters...\").\n\
Keep it under 200 words.\n"
    )
}
