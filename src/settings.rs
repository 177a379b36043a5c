//! Settings infrastructure for embedls.
//!
//! This module provides support for loading and parsing `embedls.toml` files
//! to enable or disable plugins, set rule levels, and seed the configuration
//! bridge.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SettingsError;
use crate::rules::RuleLevel;

/// Name of the settings file searched for in the workspace.
pub const SETTINGS_FILE: &str = "embedls.toml";

/// Root settings structure loaded from `embedls.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server-wide options.
    pub server: ServerSettings,

    /// Plugin id -> enabled. Plugins not listed stay enabled.
    pub plugins: BTreeMap<String, bool>,

    /// Rule id -> level. `off` disables a rule; other levels override the
    /// severity of everything it reports.
    pub rules: BTreeMap<String, RuleLevel>,

    /// Initial value of the configuration bridge.
    pub configuration: toml::Table,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Locale passed to rules, e.g. `"en"`.
    pub locale: Option<String>,
}

impl Settings {
    /// Whether the plugin `id` is enabled.
    pub fn plugin_enabled(&self, id: &str) -> bool {
        self.plugins.get(id).copied().unwrap_or(true)
    }

    /// The `[configuration]` table as JSON.
    pub fn configuration_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.configuration).unwrap_or_default()
    }
}

/// Read and parse a settings file.
pub fn read_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load settings from an `embedls.toml` file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    match read_settings(path) {
        Ok(settings) => settings,
        Err(error @ SettingsError::Parse { .. }) => {
            tracing::warn!(%error, "using default settings");
            Settings::default()
        }
        Err(error) => {
            tracing::debug!(%error, "using default settings");
            Settings::default()
        }
    }
}

/// Discover `embedls.toml` by searching up the directory tree, then direct children.
///
/// Search order:
/// 1. Walk up from `start_dir` to filesystem root
/// 2. If not found, check immediate child directories of `start_dir`
///
/// Returns `(settings, settings_dir)` where `settings_dir` is the directory
/// containing the found file. If not found, returns
/// `(Settings::default(), start_dir)`.
pub fn discover_settings(start_dir: &Path) -> (Settings, PathBuf) {
    // Phase 1: Walk up from start_dir
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            tracing::info!(path = %candidate.display(), "loading settings");
            return (load_settings(&candidate), dir.to_path_buf());
        }
        current = dir.parent();
    }

    // Phase 2: Check immediate child directories
    if let Ok(entries) = std::fs::read_dir(start_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                let candidate = entry.path().join(SETTINGS_FILE);
                if candidate.is_file() {
                    tracing::info!(path = %candidate.display(), "loading settings");
                    return (load_settings(&candidate), entry.path());
                }
            }
        }
    }

    (Settings::default(), start_dir.to_path_buf())
}
