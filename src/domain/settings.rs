use crate::domain::input::DEFAULT_AXIS_FLAT;
use crate::domain::retry::DEFAULT_MAX_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

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
    "rc_vehicle".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which link the client drives the vehicle over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ble,
    Socket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_transport")]
    pub transport: TransportKind,

    // Radio target
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_control_uuid")]
    pub ble_control_char_uuid: String,
    #[serde(default = "default_sensor_uuid")]
    pub ble_sensor_char_uuid: String,
    #[serde(default = "default_true")]
    pub enable_sensor_notifications: bool,

    // Retry Settings
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub connect_timeout_ms: u64,

    // Socket target
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    // Input
    #[serde(default = "default_axis_flat")]
    pub axis_flat: f32,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            device_name: default_device_name(),
            ble_service_uuid: default_service_uuid(),
            ble_control_char_uuid: default_control_uuid(),
            ble_sensor_char_uuid: default_sensor_uuid(),
            enable_sensor_notifications: default_true(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            scan_timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_timeout_ms(),
            socket_url: default_socket_url(),
            axis_flat: default_axis_flat(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Ble
}
fn default_device_name() -> String {
    "BLE TANK".to_string()
}
fn default_service_uuid() -> String {
    "4fafc201-1fb5-459e-8fcc-c5c9c331914b".to_string()
}
fn default_control_uuid() -> String {
    "beb5483e-36e1-4688-b7f5-ea07361b26a8".to_string()
}
fn default_sensor_uuid() -> String {
    "12345678-1234-1234-1234-123456789abc".to_string()
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    5000
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_socket_url() -> String {
    "ws://192.168.4.1/ws".to_string()
}
fn default_axis_flat() -> f32 {
    DEFAULT_AXIS_FLAT
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing or invalid
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("RcVehicleClient");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rc_vehicle_settings_{}_{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir.join("settings.json")
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"transport": "socket", "max_attempts": 3}"#).unwrap();
        assert_eq!(settings.transport, TransportKind::Socket);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.device_name, "BLE TANK");
        assert_eq!(settings.scan_timeout_ms, 10_000);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_save_and_reload() {
        let path = temp_settings_path("reload");
        let mut service = SettingsService::with_path(path.clone());
        service.get_mut().socket_url = "ws://10.0.0.7/ws".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::with_path(path.clone());
        assert_eq!(reloaded.get().socket_url, "ws://10.0.0.7/ws");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let path = temp_settings_path("invalid");
        fs::write(&path, "{ not json").unwrap();
        let service = SettingsService::with_path(path.clone());
        assert_eq!(service.get().max_attempts, DEFAULT_MAX_ATTEMPTS);
        let _ = fs::remove_file(path);
    }
}
