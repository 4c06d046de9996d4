use anyhow::Result;

use crate::config::{Credentials, RuntimeConfig};
use crate::search::resolve_search_backend;

pub fn run_doctor(cfg: &RuntimeConfig, creds: &Credentials) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    let checks = [
        ("GEMINI_API_KEY / GOOGLE_API_KEY", creds.gemini_api_key.is_some()),
        ("SERPER_API_KEY", creds.serper_api_key.is_some()),
        (
            "SEARCH_AGENT_SERVER_AUTH_TOKEN",
            creds.server_auth_token.is_some(),
        ),
    ];

    println!("Environment check:");
    for (key, ok) in checks {
        let status = if ok { "set" } else { "missing" };
        println!("- {key}: {status}");
    }

    if creds.gemini_api_key.is_none() {
        println!("Tip: export GEMINI_API_KEY; serve and ask refuse to start without it");
    }

    println!(
        "Model: {} (base_url={}, timeout_secs={})",
        cfg.model, cfg.gemini_base_url, cfg.model_timeout_secs
    );
    println!(
        "Search: backend={:?} (configured={:?}), max_results={}, timeout_secs={}",
        resolve_search_backend(cfg, creds),
        cfg.search_backend,
        cfg.search_max_results,
        cfg.search_timeout_secs
    );
    println!("Max query chars: {}", cfg.max_query_chars);
    println!(
        "Telemetry: enabled={} path={}",
        cfg.telemetry_enabled, cfg.telemetry_path
    );

    Ok(())
}
