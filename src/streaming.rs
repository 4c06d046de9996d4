use std::pin::Pin;

use anyhow::Result;
use futures::stream::Fuse;
use futures::{Stream, StreamExt};

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Incremental output of a streaming completion.
///
/// Fragments are consumed once, in order. After the fragments run out the
/// stream yields the final assembled text, which is authoritative: a backend
/// may override it when its own final answer differs from the plain
/// concatenation of fragments. The underlying stream is never polled again
/// once it has ended.
pub struct CompletionStream {
    fragments: Fuse<FragmentStream>,
    assembled: String,
    final_text: Option<String>,
}

impl CompletionStream {
    pub fn new(fragments: FragmentStream) -> Self {
        Self {
            fragments: fragments.fuse(),
            assembled: String::new(),
            final_text: None,
        }
    }

    #[cfg(test)]
    pub fn with_final_text(mut self, text: impl Into<String>) -> Self {
        self.final_text = Some(text.into());
        self
    }

    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        let item = self.fragments.next().await?;
        if let Ok(text) = &item {
            self.assembled.push_str(text);
        }
        Some(item)
    }

    /// Drains any fragments not yet read and returns the final text.
    pub async fn into_final_text(mut self) -> Result<String> {
        while let Some(fragment) = self.next_fragment().await {
            fragment?;
        }
        Ok(self.final_text.unwrap_or(self.assembled))
    }
}

/// Splits a Server-Sent Events byte stream into `data:` payloads.
///
/// Bytes are buffered until a blank line closes the event, so multi-byte
/// characters split across network chunks are decoded intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_event_boundary(&self.buffer) {
            let raw = self.buffer.drain(..end + 2).collect::<Vec<u8>>();
            if let Some(payload) = event_data(&raw[..end]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        event_data(&raw)
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

fn event_data(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let lines = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data))
        .collect::<Vec<&str>>();
    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n"))
}
