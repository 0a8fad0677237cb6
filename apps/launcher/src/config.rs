use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "launcher.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub embed_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000/api".into(),
            embed_timeout_ms: 8000,
            request_timeout_secs: 10,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn api_url(&self) -> anyhow::Result<Url> {
        let normalized = normalize_base_url(&self.api_base_url);
        Url::parse(&normalized).with_context(|| format!("invalid api base url '{normalized}'"))
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    embed_timeout_ms: Option<u64>,
    request_timeout_secs: Option<u64>,
    log_filter: Option<String>,
}

pub fn load_settings() -> Settings {
    let path = std::env::var("LAUNCHER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
    load_settings_from(Path::new(&path), |key| std::env::var(key).ok())
}

/// Layers `path` (if readable) and then `env` over the defaults.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.api_base_url {
                    settings.api_base_url = v;
                }
                if let Some(v) = file_cfg.embed_timeout_ms {
                    settings.embed_timeout_ms = v;
                }
                if let Some(v) = file_cfg.request_timeout_secs {
                    settings.request_timeout_secs = v;
                }
                if let Some(v) = file_cfg.log_filter {
                    settings.log_filter = v;
                }
            }
            Err(err) => eprintln!("ignoring {}: {err}", path.display()),
        }
    }

    if let Some(v) = env("LAUNCHER_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = env("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = env("LAUNCHER_EMBED_TIMEOUT_MS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.embed_timeout_ms = parsed;
        }
    }
    if let Some(v) = env("APP__EMBED_TIMEOUT_MS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.embed_timeout_ms = parsed;
        }
    }

    if let Some(v) = env("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = env("APP__LOG_FILTER") {
        settings.log_filter = v;
    }

    settings
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Settings::default().api_base_url;
    }
    trimmed.to_string()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
