use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use scroll_core::{ControllerConfig, ObserveOptions};
use serde::Deserialize;
use shared::domain::{PageIndex, QueryParams};
use thiserror::Error;

pub const DEFAULT_SETTINGS_FILE: &str = "scroll_demo.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub initial_page: u64,
    pub page_size: usize,
    pub total_items: usize,
    pub threshold: f32,
    pub root_margin_px: u32,
    pub poll_interval_ms: u64,
    pub latency_ms: u64,
    pub viewport_rows: usize,
    pub log_level: String,
    pub params: QueryParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            initial_page: 0,
            page_size: 10,
            total_items: 95,
            threshold: ObserveOptions::default().threshold,
            root_margin_px: 0,
            poll_interval_ms: 25,
            latency_ms: 40,
            viewport_rows: 8,
            log_level: "info".into(),
            params: QueryParams::new(),
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            initial_page: PageIndex(self.initial_page),
            observe: ObserveOptions {
                root_margin_px: self.root_margin_px,
                ..ObserveOptions::default()
            },
        }
        .with_threshold(self.threshold)
    }
}

/// Defaults, then the settings file, then `APP__*` environment variables.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_SETTINGS_FILE);
            if default_path.exists() {
                read_settings_file(default_path)?
            } else {
                Settings::default()
            }
        }
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<Settings, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_settings(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_settings(raw: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(raw)
}

pub fn apply_env_overrides<F>(settings: &mut Settings, lookup: F) -> Result<(), SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = parsed(&lookup, "APP__INITIAL_PAGE")? {
        settings.initial_page = v;
    }
    if let Some(v) = parsed(&lookup, "APP__PAGE_SIZE")? {
        settings.page_size = v;
    }
    if let Some(v) = parsed(&lookup, "APP__TOTAL_ITEMS")? {
        settings.total_items = v;
    }
    if let Some(v) = parsed::<_, f32>(&lookup, "APP__THRESHOLD")? {
        if !v.is_finite() {
            return Err(SettingsError::InvalidEnv {
                key: "APP__THRESHOLD",
                value: v.to_string(),
            });
        }
        settings.threshold = v;
    }
    if let Some(v) = parsed(&lookup, "APP__ROOT_MARGIN_PX")? {
        settings.root_margin_px = v;
    }
    if let Some(v) = parsed(&lookup, "APP__POLL_INTERVAL_MS")? {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = parsed(&lookup, "APP__LATENCY_MS")? {
        settings.latency_ms = v;
    }
    if let Some(v) = lookup("APP__LOG_LEVEL") {
        settings.log_level = v;
    }
    Ok(())
}

fn parsed<F, V>(lookup: &F, key: &'static str) -> Result<Option<V>, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<V>()
        .map(Some)
        .map_err(|_| SettingsError::InvalidEnv { key, value })
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
