pub use self::mapping::ChannelMap;
pub use self::parser::{
    Config, DiscordConfig, LoggingConfig, MatrixConfig, RelayConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod mapping;
mod parser;
mod validator;
