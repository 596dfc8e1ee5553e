use std::{collections::HashMap, fs, path::PathBuf};

use serde::Deserialize;
use storage::DEFAULT_DATA_FILE;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub data_file: PathBuf,
    pub gateway_url: String,
    pub send_timeout_ms: u64,
    pub dedup_window_ms: u64,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3000".into(),
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            gateway_url: "http://127.0.0.1:3001".into(),
            send_timeout_ms: 10_000,
            dedup_window_ms: 1_000,
            event_buffer: 256,
        }
    }
}

/// Defaults, then `server.toml`, then environment variables.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, toml::Value>>(&raw) {
            apply_file_config(&mut settings, &file_cfg);
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

pub(crate) fn apply_file_config(settings: &mut Settings, file_cfg: &HashMap<String, toml::Value>) {
    let get = |key: &str| {
        file_cfg.get(key).map(|value| match value {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    };

    if let Some(v) = get("bind_addr") {
        settings.server_bind = v;
    }
    if let Some(v) = get("data_file") {
        settings.data_file = normalize_data_file(&v);
    }
    if let Some(v) = get("gateway_url") {
        settings.gateway_url = v;
    }
    set_parsed(&mut settings.send_timeout_ms, get("send_timeout_ms"));
    set_parsed(&mut settings.dedup_window_ms, get("dedup_window_ms"));
    set_parsed(&mut settings.event_buffer, get("event_buffer"));
}

/// Later names in each list win over earlier ones.
pub(crate) fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let last = |keys: &[&str]| keys.iter().filter_map(|key| lookup(key)).last();

    if let Some(v) = last(&["SERVER_BIND", "APP__BIND_ADDR"]) {
        settings.server_bind = v;
    }
    if let Some(v) = last(&["CHATS_FILE", "APP__DATA_FILE"]) {
        settings.data_file = normalize_data_file(&v);
    }
    if let Some(v) = last(&["GATEWAY_URL", "APP__GATEWAY_URL"]) {
        settings.gateway_url = v;
    }
    set_parsed(&mut settings.send_timeout_ms, lookup("APP__SEND_TIMEOUT_MS"));
    set_parsed(&mut settings.dedup_window_ms, lookup("APP__DEDUP_WINDOW_MS"));
    set_parsed(&mut settings.event_buffer, lookup("APP__EVENT_BUFFER"));
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse::<T>().ok()) {
        *slot = parsed;
    }
}

pub(crate) fn normalize_data_file(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() {
        return Settings::default().data_file;
    }
    PathBuf::from(raw)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
