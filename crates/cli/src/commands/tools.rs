//! `pollbridge tools`: list every configured tool server's tools with their
//! parameters and a usage example, or invoke one tool.

use anyhow::{Context, bail};
use pollbridge_core::tool::ToolDescriptor;
use pollbridge_tools::{SchemaNode, ToolServers, failure_hint};
use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    call: Option<String>,
    args: Option<String>,
) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    // one-shot use; no background probing
    config.health.enabled = false;

    let servers = ToolServers::from_config(&config, None);
    if servers.is_empty() {
        println!("No tool servers configured. Add a [[tool_servers]] section to the config.");
        return Ok(());
    }

    let result = match call {
        Some(name) => call_tool(&servers, &name, args.as_deref()).await,
        None => {
            list(&servers).await;
            Ok(())
        }
    };
    servers.close().await;
    result
}

async fn list(servers: &ToolServers) {
    for handle in servers.handles() {
        println!("== {} ==", handle.name());
        match handle.as_server().list_tools().await {
            Ok(tools) if tools.is_empty() => println!("  (no tools)\n"),
            Ok(tools) => {
                for tool in &tools {
                    print!("{}", describe_tool(tool));
                }
            }
            Err(e) => {
                println!("  unreachable: {e}");
                if let Some(hint) = failure_hint(&e) {
                    println!("  hint: {hint}");
                }
                println!();
            }
        }
    }
}

async fn call_tool(servers: &ToolServers, name: &str, args: Option<&str>) -> anyhow::Result<()> {
    let arguments: serde_json::Value = match args {
        Some(raw) => serde_json::from_str(raw).context("--args must be valid JSON")?,
        None => serde_json::json!({}),
    };
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let catalog = servers.catalog();
    let response = catalog
        .call_raw(name, arguments)
        .await
        .with_context(|| format!("calling tool '{name}'"))?;
    println!("{}", response.text());
    if response.is_error {
        bail!("tool '{name}' reported an error");
    }
    Ok(())
}

/// Name, description, parameter list and an example call.
pub fn describe_tool(tool: &ToolDescriptor) -> String {
    let schema = SchemaNode::parse(&tool.input_schema);
    let mut out = format!("  {}\n", tool.name);
    if !tool.description.is_empty() {
        out.push_str(&format!("    {}\n", tool.description));
    }

    let params = schema.render();
    if params.trim().is_empty() {
        out.push_str("    Parameters: none\n");
    } else {
        out.push_str("    Parameters:\n");
        for line in params.lines() {
            out.push_str(&format!("      {line}\n"));
        }
    }
    out.push_str(&format!(
        "    Example: pollbridge tools --call {} --args '{}'\n\n",
        tool.name,
        schema.example()
    ));
    out
}
