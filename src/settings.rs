use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::notification::NotificationBackend;
use crate::panel::PanelOptions;
use crate::remote::RemoteConfig;
use crate::sync::FlushPolicy;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api";
const MIN_REQUEST_TIMEOUT_MS: u64 = 500;
const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const MIN_TEXT_DEBOUNCE_MS: u64 = 100;
const MAX_TEXT_DEBOUNCE_MS: u64 = 5_000;
const DEFAULT_TEXT_DEBOUNCE_MS: u64 = 500;
const MIN_SAVED_INDICATOR_MS: u64 = 500;
const MAX_SAVED_INDICATOR_MS: u64 = 10_000;
const DEFAULT_SAVED_INDICATOR_MS: u64 = 2_000;
const MIN_NOTIFICATION_DURATION_MS: u64 = 1_000;
const MAX_NOTIFICATION_DURATION_MS: u64 = 30_000;
const DEFAULT_NOTIFICATION_DURATION_MS: u64 = 4_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub autosave: AutosaveSettings,
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveSettings {
    pub text_debounce_ms: u64,
    pub saved_indicator_ms: u64,
    pub flush_policy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub backend: String,
    pub display_duration_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            text_debounce_ms: DEFAULT_TEXT_DEBOUNCE_MS,
            saved_indicator_ms: DEFAULT_SAVED_INDICATOR_MS,
            flush_policy: FlushPolicy::default().as_str().to_string(),
        }
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            backend: NotificationBackend::default().as_str().to_string(),
            display_duration_ms: DEFAULT_NOTIFICATION_DURATION_MS,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("crm-autosave");
        path.push("settings.toml");
        Some(path)
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(mut settings) => {
                    settings.validate();
                    settings
                }
                Err(error) => {
                    warn!(
                        "failed to parse settings config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read settings config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path().ok_or_else(|| anyhow!("unable to determine config path"))?;
        self.save_to_path(&path)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid settings config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize settings to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid settings config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!(
                "failed to write temporary settings file '{}'",
                tmp_path.display()
            )
        })?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "failed to atomically rename settings file '{}' to '{}'",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            base_url: self.api.base_url.clone(),
            request_timeout: Duration::from_millis(self.api.request_timeout_ms),
        }
    }

    pub fn panel_options(&self) -> PanelOptions {
        PanelOptions {
            text_debounce: Duration::from_millis(self.autosave.text_debounce_ms),
            saved_indicator: Duration::from_millis(self.autosave.saved_indicator_ms),
            flush_policy: FlushPolicy::from_str(&self.autosave.flush_policy).unwrap_or_default(),
        }
    }

    pub fn notification_backend(&self) -> NotificationBackend {
        NotificationBackend::from_str(&self.notifications.backend).unwrap_or_default()
    }

    fn validate(&mut self) {
        self.api.request_timeout_ms = self
            .api
            .request_timeout_ms
            .clamp(MIN_REQUEST_TIMEOUT_MS, MAX_REQUEST_TIMEOUT_MS);
        self.autosave.text_debounce_ms = self
            .autosave
            .text_debounce_ms
            .clamp(MIN_TEXT_DEBOUNCE_MS, MAX_TEXT_DEBOUNCE_MS);
        self.autosave.saved_indicator_ms = self
            .autosave
            .saved_indicator_ms
            .clamp(MIN_SAVED_INDICATOR_MS, MAX_SAVED_INDICATOR_MS);
        self.notifications.display_duration_ms = self
            .notifications
            .display_duration_ms
            .clamp(MIN_NOTIFICATION_DURATION_MS, MAX_NOTIFICATION_DURATION_MS);

        let base_url = self.api.base_url.trim().trim_end_matches('/');
        self.api.base_url = if base_url.starts_with("http://") || base_url.starts_with("https://")
        {
            base_url.to_string()
        } else {
            warn!(
                "invalid api.base_url '{}' in settings config; falling back to {}",
                self.api.base_url, DEFAULT_BASE_URL
            );
            DEFAULT_BASE_URL.to_string()
        };

        self.autosave.flush_policy = match FlushPolicy::from_str(&self.autosave.flush_policy) {
            Ok(policy) => policy.as_str().to_string(),
            Err(()) => {
                warn!(
                    "invalid flush_policy '{}' in settings config; falling back to default",
                    self.autosave.flush_policy
                );
                FlushPolicy::default().as_str().to_string()
            }
        };

        self.notifications.backend =
            match NotificationBackend::from_str(&self.notifications.backend) {
                Ok(backend) => backend.as_str().to_string(),
                Err(()) => {
                    warn!(
                        "invalid notification backend '{}' in settings config; falling back to default",
                        self.notifications.backend
                    );
                    NotificationBackend::default().as_str().to_string()
                }
            };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn settings_file_path(temp_dir: &TempDir) -> PathBuf {
        temp_dir.path().join("crm-autosave").join("settings.toml")
    }

    fn write_settings(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("settings path should have parent"))
            .expect("failed to create config dir");
        fs::write(path, contents).expect("failed to write settings");
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.autosave.text_debounce_ms, 500);
        assert_eq!(settings.autosave.saved_indicator_ms, 2_000);
        assert_eq!(settings.autosave.flush_policy, "clear");
        assert_eq!(settings.notifications.backend, "log");
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let settings = Settings::load_from_path(&settings_file_path(&temp_dir));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_malformed_toml() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = settings_file_path(&temp_dir);
        write_settings(&path, "[autosave]\ntext_debounce_ms = [invalid");

        assert_eq!(Settings::load_from_path(&path), Settings::default());
    }

    #[test]
    fn test_load_partial_toml() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = settings_file_path(&temp_dir);
        write_settings(&path, "[api]\nbase_url = \"https://crm.example.com/api/\"\n");

        let settings = Settings::load_from_path(&path);
        assert_eq!(settings.api.base_url, "https://crm.example.com/api");
        assert_eq!(settings.api.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(settings.autosave, AutosaveSettings::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = settings_file_path(&temp_dir);
        let mut expected = Settings {
            api: ApiSettings {
                base_url: "https://crm.internal/api".to_string(),
                request_timeout_ms: 3_000,
            },
            autosave: AutosaveSettings {
                text_debounce_ms: 750,
                saved_indicator_ms: 1_500,
                flush_policy: "retain-failed".to_string(),
            },
            notifications: NotificationSettings {
                backend: "both".to_string(),
                display_duration_ms: 5_000,
            },
        };
        expected.validate();

        expected
            .save_to_path(&path)
            .expect("failed to save settings for roundtrip test");

        assert!(path.exists());
        assert_eq!(Settings::load_from_path(&path), expected);
    }

    #[test]
    fn test_validate_clamps_values() {
        let mut settings = Settings::default();
        settings.autosave.text_debounce_ms = 1;
        settings.autosave.saved_indicator_ms = u64::MAX;
        settings.api.request_timeout_ms = 0;

        settings.validate();

        assert_eq!(settings.autosave.text_debounce_ms, MIN_TEXT_DEBOUNCE_MS);
        assert_eq!(settings.autosave.saved_indicator_ms, MAX_SAVED_INDICATOR_MS);
        assert_eq!(settings.api.request_timeout_ms, MIN_REQUEST_TIMEOUT_MS);
    }

    #[test]
    fn test_validate_invalid_enums_fall_back() {
        let mut settings = Settings::default();
        settings.autosave.flush_policy = "sometimes".to_string();
        settings.notifications.backend = "pager".to_string();
        settings.api.base_url = "crm.local".to_string();

        settings.validate();

        assert_eq!(settings.autosave.flush_policy, "clear");
        assert_eq!(settings.notifications.backend, "log");
        assert_eq!(settings.api.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_derived_runtime_options() {
        let mut settings = Settings::default();
        settings.autosave.flush_policy = "retain-failed".to_string();
        settings.notifications.backend = "none".to_string();

        let options = settings.panel_options();
        assert_eq!(options.text_debounce, Duration::from_millis(500));
        assert_eq!(options.saved_indicator, Duration::from_secs(2));
        assert_eq!(options.flush_policy, FlushPolicy::RetainFailed);
        assert_eq!(settings.notification_backend(), NotificationBackend::None);
        assert_eq!(
            settings.remote_config().request_timeout,
            Duration::from_secs(10)
        );
    }
}
