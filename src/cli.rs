use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "matrix-discord-relay", version, about = "Relays messages between Matrix rooms and Discord channels")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Write an example configuration to the config path and exit. An existing file is kept.
    #[arg(long)]
    pub write_default: bool,
}
