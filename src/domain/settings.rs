use crate::domain::assigned_numbers::parse_uuid;
use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

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
    "gatt_explorer".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// What to scan for and how far to explore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Advertised service UUIDs passed to the scanner
    #[serde(default = "default_scan_service_uuids")]
    pub scan_service_uuids: Vec<String>,
    /// Only services with this UUID are expanded into the tree
    #[serde(default = "default_target_uuid")]
    pub target_service_uuid: Option<String>,
    /// Only characteristics with this UUID are subscribed to
    #[serde(default = "default_target_characteristic_uuid")]
    pub target_characteristic_uuid: Option<String>,
    #[serde(default)]
    pub target_address: Option<String>,
    #[serde(default = "default_name_pattern")]
    pub name_pattern: Option<String>,
    #[serde(default = "default_false")]
    pub allow_duplicates: bool,
    /// Upper bound on sibling requests in flight per fan-out; unbounded when absent
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    /// Fail a pending exploration when the link drops instead of leaving it pending
    #[serde(default = "default_false")]
    pub abort_on_disconnect: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            scan_service_uuids: default_scan_service_uuids(),
            target_service_uuid: default_target_uuid(),
            target_characteristic_uuid: default_target_characteristic_uuid(),
            target_address: None,
            name_pattern: default_name_pattern(),
            allow_duplicates: false,
            max_in_flight: None,
            abort_on_disconnect: false,
        }
    }
}

fn default_scan_service_uuids() -> Vec<String> {
    vec!["b3b3690150d34044808d50835b13a6cd".to_string()]
}
fn default_target_uuid() -> Option<String> {
    Some("b3b3690150d34044808d50835b13a6cd".to_string())
}
fn default_target_characteristic_uuid() -> Option<String> {
    Some("b3b3910250d34044808d50835b13a6cd".to_string())
}
fn default_name_pattern() -> Option<String> {
    Some("^Pochiru".to_string())
}

/// Discovery settings with UUIDs parsed and the name pattern compiled
#[derive(Debug, Clone, Default)]
pub struct DiscoveryConfig {
    pub scan_service_uuids: Vec<Uuid>,
    pub target_service: Option<Uuid>,
    pub target_characteristic: Option<Uuid>,
    pub target_address: Option<String>,
    pub name_pattern: Option<Regex>,
    pub allow_duplicates: bool,
    pub max_in_flight: Option<usize>,
    pub abort_on_disconnect: bool,
}

impl DiscoverySettings {
    pub fn compile(&self) -> anyhow::Result<DiscoveryConfig> {
        let scan_service_uuids = self
            .scan_service_uuids
            .iter()
            .map(|s| parse_uuid(s).with_context(|| format!("Invalid scan service UUID {s:?}")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let target_service = optional_uuid(&self.target_service_uuid)
            .context("Invalid target service UUID")?;
        let target_characteristic = optional_uuid(&self.target_characteristic_uuid)
            .context("Invalid target characteristic UUID")?;

        let name_pattern = match non_empty(&self.name_pattern) {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .with_context(|| format!("Invalid name pattern {pattern:?}"))?,
            ),
            None => None,
        };

        if self.max_in_flight == Some(0) {
            anyhow::bail!("max_in_flight must be at least 1");
        }

        Ok(DiscoveryConfig {
            scan_service_uuids,
            target_service,
            target_characteristic,
            target_address: non_empty(&self.target_address).map(str::to_string),
            name_pattern,
            allow_duplicates: self.allow_duplicates,
            max_in_flight: self.max_in_flight,
            abort_on_disconnect: self.abort_on_disconnect,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn optional_uuid(value: &Option<String>) -> anyhow::Result<Option<Uuid>> {
    match non_empty(value) {
        Some(s) => Ok(Some(parse_uuid(s)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub discovery: DiscoverySettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

/// Where the active settings came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    File(PathBuf),
    Defaults,
    /// File exists but could not be read or parsed
    Invalid { path: PathBuf, reason: String },
}

pub struct SettingsService {
    settings: Settings,
    source: SettingsSource,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(&settings_path))
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("GattExplorer");
        path.push("settings.json");
        Ok(path)
    }

    /// Missing or broken files fall back to defaults
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self {
                settings: Settings::default(),
                source: SettingsSource::Defaults,
            };
        }

        match Self::load_from_file(path) {
            Ok(settings) => Self {
                settings,
                source: SettingsSource::File(path.to_path_buf()),
            },
            Err(e) => Self {
                settings: Settings::default(),
                source: SettingsSource::Invalid {
                    path: path.to_path_buf(),
                    reason: format!("{e:#}"),
                },
            },
        }
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn source(&self) -> &SettingsSource {
        &self.source
    }
}
