//! `kbchat serve` — Start the HTTP and WebSocket server.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("kbchat server");
    println!("   Listening:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:     {} ({})", config.backend.kind(), config.backend.model());
    println!("   Knowledge:   {}", config.knowledge.path.display());
    println!("   Environment: {}", if config.production { "production" } else { "local" });

    kbchat_gateway::start(config).await?;

    Ok(())
}
