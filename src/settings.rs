use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_DIR_NAME: &str = "org-portal";
const SETTINGS_FILE_NAME: &str = "settings.json";

const API_URL_ENV: &str = "PORTAL_API_URL";
const PUSH_URL_ENV: &str = "PORTAL_PUSH_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    /// Base URL of the organization API, without trailing slash.
    pub api_base_url: String,

    /// WebSocket endpoint for credit updates. When unset, credits are
    /// refreshed by polling only.
    pub push_url: Option<String>,

    /// Default lifetime of cached API responses.
    pub cache_ttl_secs: u64,

    /// Background refresh period for the credit balance.
    pub poll_interval_secs: u64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            push_url: None,
            cache_ttl_secs: 5 * 60,
            poll_interval_secs: 10,
        }
    }
}

impl PortalSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would make the poll timer panic
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Override fields from `PORTAL_API_URL` / `PORTAL_PUSH_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = env_non_empty(API_URL_ENV) {
            log::info!("Settings: API URL from {}", API_URL_ENV);
            self.api_base_url = url;
        }
        if let Some(url) = env_non_empty(PUSH_URL_ENV) {
            log::info!("Settings: push URL from {}", PUSH_URL_ENV);
            self.push_url = Some(url);
        }
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Default settings location: `<config_dir>/org-portal/settings.json`.
pub fn settings_path() -> Result<PathBuf, String> {
    let dir = dirs::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings from the default location, then apply env overrides.
pub fn load_settings() -> PortalSettings {
    let mut settings = match settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            PortalSettings::default()
        }
    };
    settings.apply_env_overrides();
    settings
}

/// Load settings from `path`, falling back to defaults on any error.
pub fn load_settings_from(path: &Path) -> PortalSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<PortalSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                PortalSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => PortalSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            PortalSettings::default()
        }
    }
}

pub fn save_settings(settings: &PortalSettings) -> Result<(), String> {
    save_settings_to(&settings_path()?, settings)
}

pub fn save_settings_to(path: &Path, settings: &PortalSettings) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory {:?}: {}", parent, e))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).map_err(|e| format!("Serialize settings: {}", e))?;

    // Write to a temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents)
        .map_err(|e| format!("Write temp settings {:?}: {}", tmp_path, e))?;

    // On Windows, rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(format!("Remove existing settings file {:?}: {}", path, e));
            }
        }
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| format!("Rename temp settings {:?} to {:?}: {}", tmp_path, path, e))?;
    Ok(())
}
