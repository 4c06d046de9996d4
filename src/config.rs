use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::*;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub model: String,
    pub gemini_base_url: String,
    pub model_timeout_secs: u64,
    pub search_backend: SearchBackend,
    pub search_max_results: usize,
    pub search_timeout_secs: u64,
    pub max_query_chars: usize,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub model: Option<String>,
    pub gemini_base_url: Option<String>,
    pub model_timeout_secs: Option<u64>,
    pub search_backend: Option<SearchBackend>,
    pub search_max_results: Option<usize>,
    pub search_timeout_secs: Option<u64>,
    pub max_query_chars: Option<usize>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

/// Secrets read once from the environment at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub gemini_api_key: Option<String>,
    pub serper_api_key: Option<String>,
    pub server_auth_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |value: &Option<String>| if value.is_some() { "set" } else { "missing" };
        f.debug_struct("Credentials")
            .field("gemini_api_key", &mask(&self.gemini_api_key))
            .field("serper_api_key", &mask(&self.serper_api_key))
            .field("server_auth_token", &mask(&self.server_auth_token))
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: env_value("GEMINI_API_KEY").or_else(|| env_value("GOOGLE_API_KEY")),
            serper_api_key: env_value("SERPER_API_KEY"),
            server_auth_token: env_value("SEARCH_AGENT_SERVER_AUTH_TOKEN"),
        }
    }
}

pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    parse_profiles(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check search backend values and field names.",
            path.display()
        )
    })
}

pub fn parse_profiles(content: &str) -> Result<ProfilesFile> {
    Ok(toml::from_str::<ProfilesFile>(content)?)
}

pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let model = cli
        .model
        .clone()
        .or(profile.model)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        model,
        gemini_base_url: cli
            .gemini_base_url
            .clone()
            .or(profile.gemini_base_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        model_timeout_secs: cli
            .model_timeout_secs
            .or(profile.model_timeout_secs)
            .unwrap_or(120)
            .max(1),
        search_backend: cli
            .search_backend
            .or(profile.search_backend)
            .unwrap_or(SearchBackend::Auto),
        search_max_results: cli
            .search_max_results
            .or(profile.search_max_results)
            .unwrap_or(5)
            .max(1),
        search_timeout_secs: cli
            .search_timeout_secs
            .or(profile.search_timeout_secs)
            .unwrap_or(15)
            .max(1),
        max_query_chars: cli
            .max_query_chars
            .or(profile.max_query_chars)
            .unwrap_or(8_000)
            .max(1),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: cli
            .telemetry_path
            .clone()
            .or(profile.telemetry_path)
            .unwrap_or_else(|| ".search-agent/telemetry/events.jsonl".to_string()),
    })
}
