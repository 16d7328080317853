//! `pollbridge config`: print a configuration template.

use pollbridge_config::AppConfig;

pub fn run(path_only: bool) {
    if path_only {
        println!("{}", AppConfig::config_dir().join("config.toml").display());
        return;
    }
    println!("# Save as {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", AppConfig::default_toml());
}
