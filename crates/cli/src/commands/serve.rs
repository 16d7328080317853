//! `pollbridge serve`: start the HTTP gateway.

use anyhow::Context;
use pollbridge_gateway::Runtime;
use std::path::Path;

pub async fn run(config_path: Option<&Path>, port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("pollbridge gateway");
    println!("   Listening:  {}:{}", config.gateway.host, config.gateway.port);
    println!("   Read mode:  {:?}", config.tasks.read_mode);
    println!(
        "   Signed:     {}",
        if config.gateway.webhook_secret.is_some() { "yes" } else { "no" }
    );

    let runtime = Runtime::from_config(config)
        .await
        .context("failed to build runtime")?;
    pollbridge_gateway::start(runtime)
        .await
        .map_err(|e| anyhow::anyhow!("gateway failed: {e}"))
}
