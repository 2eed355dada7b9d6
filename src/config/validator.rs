use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::ExposeSecret;
use thiserror::Error;

use super::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("config file {} already exists, not overwriting it", .0.display())]
    AlreadyExists(PathBuf),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matrix.homeserver_url.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "matrix.homeserver_url cannot be empty".to_string(),
            ));
        }

        if url::Url::parse(&self.matrix.homeserver_url).is_err() {
            return Err(ConfigError::InvalidConfig(format!(
                "matrix.homeserver_url is not a valid url: {}",
                self.matrix.homeserver_url
            )));
        }

        if !self.matrix.user_id.starts_with('@') || !self.matrix.user_id.contains(':') {
            return Err(ConfigError::InvalidConfig(format!(
                "matrix.user_id must look like @user:server, got {}",
                self.matrix.user_id
            )));
        }

        if self.matrix.access_token.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "matrix.access_token cannot be empty".to_string(),
            ));
        }

        if self.discord.bot_token.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.bot_token cannot be empty".to_string(),
            ));
        }

        if self.bridge.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bridge must map at least one discord channel".to_string(),
            ));
        }

        let mut seen_rooms: HashMap<&str, &str> = HashMap::new();
        for (channel_id, room_id) in &self.bridge {
            if channel_id.is_empty() || !channel_id.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "bridge key {channel_id:?} is not a discord channel id"
                )));
            }
            if !room_id.starts_with('!') {
                return Err(ConfigError::InvalidConfig(format!(
                    "bridge value {room_id:?} for channel {channel_id} is not a matrix room id"
                )));
            }
            if let Some(previous) = seen_rooms.insert(room_id, channel_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "matrix room {room_id} is mapped from both channel {previous} and {channel_id}"
                )));
            }
        }

        if self.relay.sync_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "relay.sync_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidConfig(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }
}
