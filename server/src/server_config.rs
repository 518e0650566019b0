use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::config::{ConfigManager, FileContentConfigProvider, Validate, YamlConfigSerializer};
use common::games::snake::RoomSettings;
use common::logger::LogLevel;

pub const DEFAULT_CONFIG_FILE_NAME: &str = "snake_rooms_server.yaml";

pub fn get_config_manager(
    path: &str,
) -> ConfigManager<FileContentConfigProvider, ServerConfig, YamlConfigSerializer> {
    ConfigManager::from_yaml_file(path)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub static_files_path: Option<PathBuf>,
    pub log_level: LogLevel,
    /// Outbound messages buffered per client before new ones are dropped.
    pub client_buffer_size: usize,
    pub room: RoomSettings,
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    pub empty_room_grace_secs: u64,
    pub finished_room_grace_secs: u64,
    pub check_interval_secs: u64,
}

impl CleanupSettings {
    pub fn empty_room_grace(&self) -> Duration {
        Duration::from_secs(self.empty_room_grace_secs)
    }

    pub fn finished_room_grace(&self) -> Duration {
        Duration::from_secs(self.finished_room_grace_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            empty_room_grace_secs: 30,
            finished_room_grace_secs: 60,
            check_interval_secs: 5,
        }
    }
}

impl Validate for CleanupSettings {
    fn validate(&self) -> Result<(), String> {
        if self.empty_room_grace_secs == 0 {
            return Err("Empty room grace period must be at least 1s".to_string());
        }
        if self.finished_room_grace_secs == 0 {
            return Err("Finished room grace period must be at least 1s".to_string());
        }
        if self.check_interval_secs == 0 {
            return Err("Cleanup check interval must be at least 1s".to_string());
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        self.listen_address
            .parse()
            .map_err(|e| format!("Invalid listen address '{}': {}", self.listen_address, e))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:5000".to_string(),
            static_files_path: None,
            log_level: LogLevel::Info,
            client_buffer_size: 64,
            room: RoomSettings::default(),
            cleanup: CleanupSettings::default(),
        }
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<(), String> {
        self.socket_addr()?;
        if !(1..=4096).contains(&self.client_buffer_size) {
            return Err("Client buffer size must be between 1 and 4096".to_string());
        }
        self.room.validate()?;
        self.cleanup.validate()?;
        Ok(())
    }
}
