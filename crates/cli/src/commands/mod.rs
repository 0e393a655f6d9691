pub mod chat;
pub mod doctor;
pub mod init;
pub mod knowledge;
pub mod serve;

use kbchat_config::{AppConfig, Environment};
use std::path::{Path, PathBuf};

/// The config file to use: the explicit one, else `~/.kbchat/config.toml`.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load configuration with environment overrides applied.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let path = config_path(explicit);
    AppConfig::load_with_env(&path, &Environment::from_env())
        .map_err(|e| format!("Failed to load config: {e}").into())
}
