pub mod chat;
pub mod config_cmd;
pub mod serve;
pub mod status;
pub mod tools;

use anyhow::Context;
use pollbridge_config::AppConfig;
use std::path::{Path, PathBuf};

pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}

/// Load, apply environment overrides and validate.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let file = config_file(path);
    AppConfig::load_with_env(&file)
        .with_context(|| format!("failed to load config from {}", file.display()))
}
