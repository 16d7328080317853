//! `pollbridge status`: show the effective configuration.

use pollbridge_config::{AppConfig, mask_secret};
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let file = super::config_file(config_path);
    let config = super::load_config(config_path)?;
    print!("{}", render(&config));

    if file.exists() {
        println!("\n  Config file: {}", file.display());
    } else {
        println!("\n  No config file at {}; defaults in use", file.display());
        println!("  Run `pollbridge config` for a template");
    }
    Ok(())
}

fn masked(secret: Option<&str>) -> String {
    match secret {
        Some(s) if !s.is_empty() => mask_secret(s),
        _ => "(not set)".into(),
    }
}

pub fn render(config: &AppConfig) -> String {
    let mut out = String::new();
    let mut line = |label: &str, value: String| {
        out.push_str(&format!("  {label:<14}{value}\n"));
    };

    line("Provider:", config.default_provider.clone());
    let provider = config.default_provider_config();
    line(
        "API key:",
        masked(
            provider
                .and_then(|p| p.api_key.as_deref())
                .or(config.api_key.as_deref()),
        ),
    );
    line(
        "Model:",
        config
            .agent
            .model
            .clone()
            .or_else(|| provider.and_then(|p| p.default_model.clone()))
            .unwrap_or_else(|| "(provider default)".into()),
    );
    line("Read mode:", format!("{:?}", config.tasks.read_mode));
    line("Task TTL:", format!("{}s", config.tasks.task_ttl_secs));
    line(
        "Health:",
        if config.health.enabled {
            format!("supervised, probe every {}s", config.health.probe_interval_secs)
        } else {
            format!("managed, reuse window {}s", config.connection.reuse_window_secs)
        },
    );
    line(
        "Gateway:",
        format!("{}:{}", config.gateway.host, config.gateway.port),
    );
    line("Webhook key:", masked(config.gateway.webhook_secret.as_deref()));

    let servers: Vec<_> = config.enabled_tool_servers().collect();
    line("Tool servers:", servers.len().to_string());
    for server in servers {
        let target = server
            .endpoint()
            .or_else(|| server.command.clone())
            .unwrap_or_default();
        line(
            "",
            format!(
                "- {} ({:?}) {} token={}",
                server.name,
                server.kind,
                target,
                masked(server.token.as_deref())
            ),
        );
    }
    out
}
