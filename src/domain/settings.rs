use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "led_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Radio timing knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleSettings {
    /// Ceiling for a scan that nobody stops
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Bound on the whole connect/discover/write/disconnect one-shot
    #[serde(default = "default_one_shot_timeout_ms")]
    pub one_shot_timeout_ms: u64,
    /// Pause after the one-shot write so the packet leaves before disconnect
    #[serde(default = "default_one_shot_settle_ms")]
    pub one_shot_settle_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            one_shot_timeout_ms: default_one_shot_timeout_ms(),
            one_shot_settle_ms: default_one_shot_settle_ms(),
        }
    }
}

impl BleSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn one_shot_timeout(&self) -> Duration {
        Duration::from_millis(self.one_shot_timeout_ms)
    }

    pub fn one_shot_settle(&self) -> Duration {
        Duration::from_millis(self.one_shot_settle_ms)
    }
}

fn default_scan_timeout_ms() -> u64 {
    12_000
}
fn default_one_shot_timeout_ms() -> u64 {
    4_000
}
fn default_one_shot_settle_ms() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = config_dir()?.join("settings.json");
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path, falling back to defaults if missing or unreadable
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

/// `<config dir>/LedController`, created on demand
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let mut path = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push("LedController");
    fs::create_dir_all(&path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("led_controller_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"ble": {"scan_timeout_ms": 10000}}"#).unwrap();
        assert_eq!(settings.ble.scan_timeout(), Duration::from_secs(10));
        assert_eq!(settings.ble.one_shot_timeout_ms, 4_000);
        assert_eq!(settings.ble.one_shot_settle_ms, 300);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_path("settings.json");
        let mut service = SettingsService::load(path.clone());
        service.get_mut().ble.one_shot_timeout_ms = 3_000;
        service.save().unwrap();

        let reloaded = SettingsService::load(path.clone());
        assert_eq!(reloaded.get().ble.one_shot_timeout_ms, 3_000);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let path = temp_path("corrupt_settings.json");
        fs::write(&path, "{ not json").unwrap();
        let service = SettingsService::load(path.clone());
        assert_eq!(service.get().ble, BleSettings::default());
        let _ = fs::remove_file(path);
    }
}
