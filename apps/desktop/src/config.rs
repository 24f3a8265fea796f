use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use serde::Deserialize;
use shared::domain::SearchBudget;
use tracing::warn;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "kg-chat.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub enable_multi_hop: bool,
    pub search_budget: SearchBudget,
    pub connect_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5001".into(),
            enable_multi_hop: true,
            search_budget: SearchBudget::Deeper,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    enable_multi_hop: Option<bool>,
    search_budget: Option<String>,
    connect_timeout_secs: Option<u64>,
}

/// Defaults, then the config file, then the environment.
///
/// An explicitly named config file must exist; the default one is optional.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match config_path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if required => {
            return Err(err).with_context(|| format!("failed to read '{}'", path.display()))
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings.server_url = normalize_server_url(&settings.server_url)?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw)?;
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.enable_multi_hop {
        settings.enable_multi_hop = v;
    }
    if let Some(v) = file_cfg.search_budget {
        settings.search_budget = v.parse()?;
    }
    if let Some(v) = file_cfg.connect_timeout_secs {
        settings.connect_timeout_secs = v;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("KG_CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = var("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = var("APP__ENABLE_MULTI_HOP") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => settings.enable_multi_hop = true,
            "0" | "false" | "no" | "off" => settings.enable_multi_hop = false,
            _ => warn!(value = %v, "ignoring unparsable APP__ENABLE_MULTI_HOP"),
        }
    }

    if let Some(v) = var("APP__SEARCH_BUDGET") {
        match v.parse() {
            Ok(parsed) => settings.search_budget = parsed,
            Err(err) => warn!(error = %err, "ignoring APP__SEARCH_BUDGET"),
        }
    }

    if let Some(v) = var("APP__CONNECT_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.connect_timeout_secs = parsed;
        }
    }
}

pub fn normalize_server_url(raw: &str) -> anyhow::Result<String> {
    let raw = raw.trim();
    let url = Url::parse(raw).with_context(|| format!("invalid server url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("server url '{raw}' must use http or https");
    }
    Ok(raw.trim_end_matches('/').to_string())
}
