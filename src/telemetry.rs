//! Append-only JSONL log of command outcomes and agent runs.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Cheap to clone; clones share the write lock so concurrent runs never
/// interleave partial lines.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    path: Option<PathBuf>,
    command: String,
    run_id: String,
    write_lock: Arc<Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            path: cfg.telemetry_enabled.then(|| PathBuf::from(&cfg.telemetry_path)),
            command,
            run_id: format!("{}-{}", std::process::id(), unix_ms_now()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self {
            path: None,
            command: String::new(),
            run_id: String::new(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Records `event` with the fields of `payload` merged in. Write failures
    /// are logged and otherwise ignored.
    pub fn emit(&self, event: &str, payload: Value) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        let mut record = json!({
            "ts_unix_ms": unix_ms_now(),
            "event": event,
            "run_id": self.run_id,
            "command": self.command,
        });
        if let Value::Object(fields) = payload
            && let Some(record) = record.as_object_mut()
        {
            record.extend(fields);
        }

        if let Err(err) = self.append(path, &record) {
            tracing::warn!(
                event,
                path = %path.display(),
                error = %format!("{err:#}"),
                "telemetry write failed"
            );
        }
    }

    fn append(&self, path: &Path, record: &Value) -> Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create '{}'", dir.display()))?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed to append to '{}'", path.display()))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TelemetrySummary {
    pub events: usize,
    pub unreadable: usize,
    pub commands_completed: usize,
    pub commands_failed: usize,
    pub runs_completed: usize,
    pub runs_with_search: usize,
    pub runs_failed: usize,
    pub runs_abandoned: usize,
}

impl TelemetrySummary {
    fn record(&mut self, event: &Value) {
        self.events += 1;
        match event.get("event").and_then(Value::as_str) {
            Some("command.completed") => self.commands_completed += 1,
            Some("command.failed") => self.commands_failed += 1,
            Some("agent.run.completed") => {
                self.runs_completed += 1;
                if event.get("used_search").and_then(Value::as_bool) == Some(true) {
                    self.runs_with_search += 1;
                }
            }
            Some("agent.run.failed") => self.runs_failed += 1,
            Some("agent.run.abandoned") => self.runs_abandoned += 1,
            _ => {}
        }
    }
}

/// Summarizes the last `limit` lines; blank lines are skipped.
pub fn summarize_telemetry_lines(lines: &[String], limit: usize) -> TelemetrySummary {
    let start = lines.len().saturating_sub(limit.max(1));
    let mut summary = TelemetrySummary::default();
    for line in lines[start..].iter().map(|line| line.trim()) {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(event) => summary.record(&event),
            Err(_) => summary.unreadable += 1,
        }
    }
    summary
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            println!("No telemetry recorded at '{}'.", path.display());
            return Ok(());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read telemetry file '{}'", path.display()));
        }
    };
    let lines = content.lines().map(str::to_string).collect::<Vec<String>>();
    let summary = summarize_telemetry_lines(&lines, limit);

    println!(
        "Telemetry: {} ({} events, {} unreadable)",
        path.display(),
        summary.events,
        summary.unreadable
    );
    println!(
        "Commands: {} completed, {} failed",
        summary.commands_completed, summary.commands_failed
    );
    println!(
        "Agent runs: {} completed ({} searched the web), {} failed, {} abandoned",
        summary.runs_completed,
        summary.runs_with_search,
        summary.runs_failed,
        summary.runs_abandoned
    );
    Ok(())
}
