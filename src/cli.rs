use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Auto,
    Serper,
    Simulated,
}

#[derive(Debug, Subcommand)]
pub enum ProfileCommands {
    #[command(about = "List configured profiles and highlight the active profile")]
    List,
    #[command(about = "Show the active profile's resolved runtime settings")]
    Show,
}

#[derive(Debug, Subcommand)]
pub enum TelemetryCommands {
    #[command(about = "Summarize telemetry events from a JSONL stream")]
    Report {
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 5000)]
        limit: usize,
    },
}

const CLI_EXAMPLES: &str = "Examples:\n\
  search-agent serve --host 127.0.0.1 --port 3000\n\
  search-agent ask \"What is the capital of France?\"\n\
  search-agent --search-backend simulated ask \"Latest news today 2025\"\n\
  search-agent --model gemini-2.5-flash serve\n\
  search-agent doctor\n\
  search-agent profiles show\n\
  search-agent telemetry report --limit 2000\n\
\n\
Streaming endpoint:\n\
  curl -N -X POST http://127.0.0.1:3000/chat -H 'content-type: application/json' \\\n\
    -d '{\"query\": \"Explain the state of AI in 2025?\"}'";

#[derive(Debug, Parser)]
#[command(name = "search-agent")]
#[command(about = "Query-answering agent that streams reasoning, web searches, and answers")]
#[command(after_long_help = CLI_EXAMPLES)]
pub struct Cli {
    #[arg(long, env = "SEARCH_AGENT_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "SEARCH_AGENT_PROFILE", default_value = "default")]
    pub profile: String,

    #[arg(long, env = "SEARCH_AGENT_CONFIG", default_value = ".search-agent/config.toml")]
    pub config_path: String,

    #[arg(long, env = "SEARCH_AGENT_GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    #[arg(long, env = "SEARCH_AGENT_SEARCH_BACKEND", value_enum)]
    pub search_backend: Option<SearchBackend>,

    #[arg(long, env = "SEARCH_AGENT_SEARCH_MAX_RESULTS")]
    pub search_max_results: Option<usize>,

    #[arg(long, env = "SEARCH_AGENT_SEARCH_TIMEOUT_SECS")]
    pub search_timeout_secs: Option<u64>,

    #[arg(long, env = "SEARCH_AGENT_MODEL_TIMEOUT_SECS")]
    pub model_timeout_secs: Option<u64>,

    #[arg(long, env = "SEARCH_AGENT_MAX_QUERY_CHARS")]
    pub max_query_chars: Option<usize>,

    #[arg(long, env = "SEARCH_AGENT_TELEMETRY_ENABLED", action = clap::ArgAction::Set)]
    pub telemetry_enabled: Option<bool>,

    #[arg(long, env = "SEARCH_AGENT_TELEMETRY_PATH")]
    pub telemetry_path: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server exposing the streaming /chat endpoint")]
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = 3000)]
        port: u16,
    },
    #[command(about = "Answer one query locally, printing each event as a JSON line")]
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
    },
    #[command(about = "Check credentials and show the resolved configuration")]
    Doctor,
    #[command(about = "Inspect profile configuration and active resolved profile state")]
    Profiles {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    #[command(about = "Telemetry utilities and reporting")]
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommands,
    },
}

pub fn command_label(command: &Commands) -> String {
    match command {
        Commands::Serve { .. } => "serve".to_string(),
        Commands::Ask { .. } => "ask".to_string(),
        Commands::Doctor => "doctor".to_string(),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => "profiles.list".to_string(),
            ProfileCommands::Show => "profiles.show".to_string(),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { .. } => "telemetry.report".to_string(),
        },
    }
}
