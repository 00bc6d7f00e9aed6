use gemini_relay_core::config::{redact, Config};
use gemini_relay_core::proxy::ProxyServer;

pub async fn run(mut config: Config, port_override: Option<u16>) -> anyhow::Result<()> {
    // Apply port override if provided
    if let Some(port) = port_override {
        config.server.port = port;
    }

    tracing::info!("Starting Gemini Relay...");
    tracing::info!("  Listen: {}", config.server.bind_address());
    tracing::info!("  Upstream: {}", config.upstream.base_url);
    tracing::info!("  Auth scheme: {:?}", config.upstream.auth_scheme);
    tracing::info!("  Credential: {}", redact(&config.upstream.api_key));

    // Refuses to start without a credential
    let server = ProxyServer::new(&config)?;

    tracing::info!("Relay server starting on http://{}", config.server.bind_address());
    tracing::info!("Press Ctrl+C to stop");

    // Run server (blocks until shutdown)
    server.run().await?;

    Ok(())
}
