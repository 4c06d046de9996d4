use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One unit of progress reported by an agent run.
///
/// Serialized with a `type` tag, e.g. `{"type":"reasoning","content":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Reasoning {
        content: String,
    },
    ToolCall {
        tool: String,
        input: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Response {
        content: String,
    },
}

impl StreamEvent {
    pub fn reasoning(content: impl Into<String>) -> Self {
        StreamEvent::Reasoning {
            content: content.into(),
        }
    }

    pub fn tool_started(tool: impl Into<String>, input: impl Into<String>) -> Self {
        StreamEvent::ToolCall {
            tool: tool.into(),
            input: input.into(),
            output: None,
        }
    }

    pub fn tool_completed(
        tool: impl Into<String>,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        StreamEvent::ToolCall {
            tool: tool.into(),
            input: input.into(),
            output: Some(output.into()),
        }
    }

    pub fn response(content: impl Into<String>) -> Self {
        StreamEvent::Response {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Reasoning { .. } => "reasoning",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::Response { .. } => "response",
        }
    }
}

/// Returned by a sink whose consumer has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed;

impl fmt::Display for StreamClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("event stream consumer disconnected")
    }
}

impl std::error::Error for StreamClosed {}

/// Destination for events produced by an agent run.
///
/// `emit` resolves only once the event has been accepted, so a slow consumer
/// slows the producer down instead of queueing without bound.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: StreamEvent) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<StreamEvent> {
    async fn emit(&self, event: StreamEvent) -> Result<()> {
        tracing::trace!(kind = event.kind(), "queueing stream event");
        self.send(event).await.map_err(|_| StreamClosed)?;
        Ok(())
    }
}

/// Writes each event as one JSON line on stdout. Used by `ask`.
pub struct JsonLinesSink;

#[async_trait]
impl EventSink for JsonLinesSink {
    async fn emit(&self, event: StreamEvent) -> Result<()> {
        use std::io::Write;

        let line = serde_json::to_string(&event)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|_| StreamClosed)?;
        stdout.flush().map_err(|_| StreamClosed)?;
        Ok(())
    }
}
