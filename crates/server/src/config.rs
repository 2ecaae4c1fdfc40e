use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/records.db".into(),
            log_filter: "info".into(),
        }
    }
}

/// Defaults, then `server.toml` in the working directory if present, then
/// `APP__*` environment variables (e.g. `APP__BIND_ADDR`).
pub fn load_settings() -> anyhow::Result<Settings> {
    build_settings(Path::new(SETTINGS_FILE), None)
}

pub(crate) fn build_settings(
    file: &Path,
    env_override: Option<HashMap<String, String>>,
) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let settings = Config::builder()
        .set_default("bind_addr", defaults.bind_addr)?
        .set_default("database_url", defaults.database_url)?
        .set_default("log_filter", defaults.log_filter)?
        .add_source(File::from(file).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .source(env_override),
        )
        .build()
        .with_context(|| format!("failed to load settings from '{}'", file.display()))?;
    settings
        .try_deserialize()
        .context("invalid server settings")
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

pub(crate) fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") {
        return raw_database_url.to_string();
    }

    let path = if let Some(path) = raw_database_url.strip_prefix("sqlite://") {
        path
    } else if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        path
    } else if raw_database_url.contains("://") {
        return raw_database_url.to_string();
    } else {
        raw_database_url
    };

    let path = path.replace('\\', "/");
    if has_windows_drive_prefix(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn has_windows_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
