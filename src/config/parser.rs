use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use super::ConfigError;

/// Example configuration written by `--write-default` or when no config file exists yet.
pub const DEFAULT_CONFIG: &str = r#"matrix:
  homeserver_url: "https://matrix-client.matrix.org"
  user_id: "@username:matrix.org"
  access_token: "access.token"

discord:
  bot_token: "some.bot.token"
  disable_everyone_mention: true

# Discord channel id -> Matrix room id
bridge:
  "1235678930234": "!roomid.Aefdy5f:matrix.org"

storage:
  data_dir: "bridgedata"
  identities_file: "webhooks.json"
  messages_file: "messages.json"

relay:
  attachment_size_limit: 65536
  max_discord_file_size: 8388608
  sync_timeout_ms: 30000
  sync_retry_delay_ms: 1000

logging:
  level: "info"
  format: "pretty"

web:
  enabled: false
  bind_address: "127.0.0.1"
  port: 9005
"#;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub matrix: MatrixConfig,
    pub discord: DiscordConfig,
    /// Discord channel id to Matrix room id.
    pub bridge: BTreeMap<String, String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize)]
pub struct MatrixConfig {
    pub homeserver_url: String,
    #[serde(alias = "username")]
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub access_token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct DiscordConfig {
    #[serde(alias = "token", deserialize_with = "deserialize_secret")]
    pub bot_token: SecretString,
    /// Stops relayed Matrix text from pinging `@everyone` and `@here`.
    #[serde(default = "default_disable_everyone_mention")]
    pub disable_everyone_mention: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_identities_file")]
    pub identities_file: String,
    #[serde(default = "default_messages_file")]
    pub messages_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            identities_file: default_identities_file(),
            messages_file: default_messages_file(),
        }
    }
}

impl StorageConfig {
    pub fn identities_path(&self) -> PathBuf {
        self.data_dir.join(&self.identities_file)
    }

    pub fn messages_path(&self) -> PathBuf {
        self.data_dir.join(&self.messages_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Largest single Discord attachment re-uploaded to Matrix instead of listed as a link.
    #[serde(default = "default_attachment_size_limit")]
    pub attachment_size_limit: u64,
    #[serde(default = "default_max_discord_file_size")]
    pub max_discord_file_size: u64,
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,
    #[serde(default = "default_sync_retry_delay_ms")]
    pub sync_retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            attachment_size_limit: default_attachment_size_limit(),
            max_discord_file_size: default_max_discord_file_size(),
            sync_timeout_ms: default_sync_timeout_ms(),
            sync_retry_delay_ms: default_sync_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Writes the example configuration to a new file. An existing file is left untouched.
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ConfigError::AlreadyExists(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        file.write_all(DEFAULT_CONFIG.as_bytes())?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RELAY_MATRIX_ACCESS_TOKEN") {
            self.matrix.access_token = SecretString::new(value.into_boxed_str());
        }
        if let Ok(value) = std::env::var("RELAY_DISCORD_BOT_TOKEN") {
            self.discord.bot_token = SecretString::new(value.into_boxed_str());
        }
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(SecretString::new(value.into_boxed_str()))
}

fn default_disable_everyone_mention() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("bridgedata")
}

fn default_identities_file() -> String {
    "webhooks.json".to_string()
}

fn default_messages_file() -> String {
    "messages.json".to_string()
}

fn default_attachment_size_limit() -> u64 {
    64 * 1024
}

fn default_max_discord_file_size() -> u64 {
    8 * 1024 * 1024
}

fn default_sync_timeout_ms() -> u64 {
    30000
}

fn default_sync_retry_delay_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9005
}
