use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use search_agent::agent::SearchAgent;
use search_agent::cli::{Cli, Commands, ProfileCommands, TelemetryCommands, command_label};
use search_agent::config::{Credentials, RuntimeConfig, load_profiles, resolve_runtime_config};
use search_agent::doctor::run_doctor;
use search_agent::error::{categorize_error, format_cli_error};
use search_agent::event::JsonLinesSink;
use search_agent::profiles::{run_profiles_list, run_profiles_show};
use search_agent::provider::build_model;
use search_agent::search::build_search;
use search_agent::server::run_server;
use search_agent::telemetry::{TelemetrySink, run_telemetry_report};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %format!("{err:#}"), "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let profiles = load_profiles(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, &profiles)?;
    let creds = Credentials::from_env();
    let label = command_label(&cli.command);
    let telemetry = TelemetrySink::new(&cfg, label.clone());

    let outcome = match cli.command {
        Commands::Serve { host, port } => run_server(&cfg, &creds, host, port, &telemetry).await,
        Commands::Ask { query } => run_ask(&cfg, &creds, &query.join(" "), &telemetry).await,
        Commands::Doctor => run_doctor(&cfg, &creds),
        Commands::Profiles { command } => match command {
            ProfileCommands::List => run_profiles_list(&profiles, &cfg),
            ProfileCommands::Show => run_profiles_show(&cfg),
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Report { path, limit } => run_telemetry_report(&cfg, path, limit),
        },
    };

    match &outcome {
        Ok(()) => telemetry.emit("command.completed", json!({ "command": label })),
        Err(err) => telemetry.emit(
            "command.failed",
            json!({ "command": label, "error": format!("{err:#}") }),
        ),
    }
    outcome
}

async fn run_ask(
    cfg: &RuntimeConfig,
    creds: &Credentials,
    query: &str,
    telemetry: &TelemetrySink,
) -> Result<()> {
    if query.trim().is_empty() {
        return Err(anyhow::anyhow!("query cannot be empty for ask"));
    }

    let agent = SearchAgent::new(build_model(cfg, creds)?, build_search(cfg, creds)?);
    tracing::info!(
        model = agent.model_name(),
        search_backend = agent.search_backend(),
        "running one-shot query"
    );
    let summary = agent.run(query, &JsonLinesSink).await?;
    telemetry.emit(
        "agent.run.completed",
        json!({
            "used_search": summary.used_search,
            "fragments": summary.fragments,
            "answer_chars": summary.answer_chars
        }),
    );
    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
