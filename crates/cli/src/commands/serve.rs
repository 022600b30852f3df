//! `agrag serve`: Start the HTTP/SSE gateway.

use std::path::Path;

use super::load_config;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("agrag gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Agents:    {}", config.agents.len());
    if !config.has_api_key() {
        println!("   Warning:   no API key configured, model calls will fail");
    }

    agrag_gateway::start(config).await?;

    Ok(())
}
