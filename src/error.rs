use crate::event::StreamClosed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Search,
    Input,
    Server,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Search => "SEARCH",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Server => "SERVER",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Set GEMINI_API_KEY (or GOOGLE_API_KEY) and check --model / --gemini-base-url."
            }
            ErrorCategory::Search => {
                "Set SERPER_API_KEY or run with --search-backend simulated."
            }
            ErrorCategory::Input => "Run search-agent --help and correct command arguments.",
            ErrorCategory::Server => {
                "Check --host/--port and that no other process is bound to the address."
            }
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    let msg = format!("{err:#}").to_ascii_lowercase();

    if msg.contains("api_key") || msg.contains("gemini") || msg.contains("model") {
        return ErrorCategory::Provider;
    }

    if msg.contains("serper") || msg.contains("search backend") {
        return ErrorCategory::Search;
    }

    if msg.contains("profile")
        || msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("query")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("bind") || msg.contains("server") {
        return ErrorCategory::Server;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {:#}\nHint: {}", category.code(), err, category.hint())
}

/// Text delivered to the client in the terminal `response` event of a
/// failed run.
pub fn stream_error_message(err: &anyhow::Error) -> String {
    let rendered = format!("{err:#}");
    if rendered.trim().is_empty() {
        "Error: Unknown error".to_string()
    } else {
        format!("Error: {rendered}")
    }
}

pub fn is_stream_closed(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<StreamClosed>().is_some())
}
