use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn default_device_id() -> String {
    "CHECADOR-001".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device_id: String,
    pub host: String,
    pub port: u16,
    pub admin_password_hash: String,
    pub ssl_enabled: bool,
    pub ssl_certfile: String,
    pub ssl_keyfile: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            host: default_host(),
            port: default_port(),
            admin_password_hash: String::new(),
            ssl_enabled: false,
            ssl_certfile: "/etc/checador/ssl/cert.pem".to_string(),
            ssl_keyfile: "/etc/checador/ssl/key.pem".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub resolution_width: u32,
    pub resolution_height: u32,
    pub roi_x: u32,
    pub roi_y: u32,
    pub roi_width: u32,
    pub roi_height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            resolution_width: 640,
            resolution_height: 480,
            roi_x: 0,
            roi_y: 0,
            roi_width: 640,
            roi_height: 480,
        }
    }
}

impl CameraConfig {
    pub fn roi(&self) -> crate::capture::Roi {
        crate::capture::Roi {
            x: self.roi_x,
            y: self.roi_y,
            w: self.roi_width,
            h: self.roi_height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub mindtct_path: String,
    pub bozorth3_path: String,
    pub match_threshold: i64,
    pub min_quality_score: i64,
    pub required_templates: i64,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            mindtct_path: "/usr/local/nbis/bin/mindtct".to_string(),
            bozorth3_path: "/usr/local/nbis/bin/bozorth3".to_string(),
            match_threshold: 40,
            min_quality_score: 20,
            required_templates: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/checador/checador.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub template_dir: String,
    pub temp_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            template_dir: "/var/lib/checador/templates".to_string(),
            temp_dir: "/var/lib/checador/temp".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn template_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.template_dir)
    }

    pub fn temp_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeclockConfig {
    pub antibounce_seconds: i64,
    /// Default 6: 3 in + 3 out.
    pub max_punches_per_day: i64,
    pub punch_cooldown_seconds: i64,
}

impl Default for TimeclockConfig {
    fn default() -> Self {
        Self {
            antibounce_seconds: 10,
            max_punches_per_day: 6,
            punch_cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSecurityConfig {
    pub user_agent_check_enabled: bool,
    pub challenge_expiry_seconds: i64,
}

impl Default for DeviceSecurityConfig {
    fn default() -> Self {
        Self {
            user_agent_check_enabled: true,
            challenge_expiry_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
    pub sync_interval_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: String::new(),
            sync_interval_minutes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPunchConfig {
    pub enabled_on_startup: bool,
    pub cooldown_seconds: i64,
    pub difference_threshold: f64,
    pub stable_frames: u32,
}

impl Default for AutoPunchConfig {
    fn default() -> Self {
        Self {
            enabled_on_startup: false,
            cooldown_seconds: 5,
            difference_threshold: 0.15,
            stable_frames: 3,
        }
    }
}

/// The full kiosk configuration surface. Every section has a documented
/// default, so a partial TOML file still loads — only the fields actually
/// present in the file override the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub camera: CameraConfig,
    pub fingerprint: FingerprintConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub timeclock: TimeclockConfig,
    pub device_security: DeviceSecurityConfig,
    pub server: ServerConfig,
    pub autopunch: AutoPunchConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

/// Guards concurrent writers to the on-disk config file (the calibration
/// ROI endpoint is the only write path today, but a second admin session
/// saving at the same moment must serialize rather than interleave writes).
pub struct ConfigHandle {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl ConfigHandle {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: AsyncMutex::new(()),
        }
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().await;
        config.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.timeclock.antibounce_seconds, 10);
        assert_eq!(config.fingerprint.match_threshold, 40);
        assert_eq!(config.fingerprint.min_quality_score, 20);
        assert_eq!(config.timeclock.max_punches_per_day, 6);
        assert_eq!(config.timeclock.punch_cooldown_seconds, 300);
        assert_eq!(config.device_security.challenge_expiry_seconds, 300);
        assert_eq!(config.autopunch.cooldown_seconds, 5);
        assert_eq!(config.autopunch.difference_threshold, 0.15);
        assert_eq!(config.autopunch.stable_frames, 3);
        assert_eq!(config.server.sync_interval_minutes, 5);
    }

    #[test]
    fn partial_toml_file_falls_back_to_defaults() {
        let partial = r#"
            [app]
            device_id = "KIOSK-7"
            admin_password_hash = "argon2-hash-here"
        "#;
        let config: Config = toml::from_str(partial).unwrap();
        assert_eq!(config.app.device_id, "KIOSK-7");
        assert_eq!(config.app.port, 8000);
        assert_eq!(config.camera.resolution_width, 640);
    }

    #[test]
    fn load_and_save_roundtrip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.app.device_id = "KIOSK-ROUNDTRIP".to_string();
        config.camera.roi_x = 50;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.app.device_id, "KIOSK-ROUNDTRIP");
        assert_eq!(loaded.camera.roi_x, 50);
    }

    #[tokio::test]
    async fn config_handle_save_serializes_through_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let handle = ConfigHandle::new(path.clone());
        let config = Config::default();
        handle.save(&config).await.unwrap();
        assert!(path.exists());
    }
}
