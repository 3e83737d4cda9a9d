use crate::state::Platform;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default)]
    pub default_platform: Platform,
    #[serde(default = "default_check_on_create")]
    pub check_on_create: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub data_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_ping_binary")]
    pub ping_binary: String,
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,
    #[serde(default = "default_sshpass_binary")]
    pub sshpass_binary: String,
    #[serde(default = "default_powershell_binary")]
    pub powershell_binary: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            default_platform: Platform::default(),
            check_on_create: default_check_on_create(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ping_binary: default_ping_binary(),
            ssh_binary: default_ssh_binary(),
            sshpass_binary: default_sshpass_binary(),
            powershell_binary: default_powershell_binary(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }

        validate_monitor(&self.monitor)?;
        validate_storage(&self.storage)?;
        validate_transport(&self.transport)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_monitor(cfg: &MonitorConfig) -> Result<(), ConfigError> {
    if cfg.interval_secs < 1 {
        return Err(ConfigError::Validation(
            "monitor.interval_secs должно быть >= 1".to_string(),
        ));
    }
    if cfg.probe_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "monitor.probe_timeout_ms должен быть > 0".to_string(),
        ));
    }
    if cfg.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "monitor.connect_timeout_secs должен быть > 0".to_string(),
        ));
    }
    if cfg.query_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "monitor.query_timeout_secs должен быть > 0".to_string(),
        ));
    }
    if cfg.command_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "monitor.command_timeout_secs должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_storage(cfg: &StorageConfig) -> Result<(), ConfigError> {
    if let Some(path) = &cfg.data_file {
        if path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.data_file не должен быть пустой строкой".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_transport(cfg: &TransportConfig) -> Result<(), ConfigError> {
    let binaries = [
        ("ping_binary", &cfg.ping_binary),
        ("ssh_binary", &cfg.ssh_binary),
        ("sshpass_binary", &cfg.sshpass_binary),
        ("powershell_binary", &cfg.powershell_binary),
    ];
    for (field, value) in binaries {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "transport.{field} не должен быть пустым"
            )));
        }
    }
    Ok(())
}

const fn default_interval_secs() -> u64 {
    300
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_query_timeout_secs() -> u64 {
    30
}

const fn default_command_timeout_secs() -> u64 {
    120
}

const fn default_check_on_create() -> bool {
    true
}

fn default_ping_binary() -> String {
    "ping".to_string()
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_sshpass_binary() -> String {
    "sshpass".to_string()
}

fn default_powershell_binary() -> String {
    if cfg!(target_os = "windows") {
        "powershell".to_string()
    } else {
        "pwsh".to_string()
    }
}
