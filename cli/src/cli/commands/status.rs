use std::path::{Path, PathBuf};

use gemini_relay_core::config::{redact, Config};

pub async fn run(config: Config, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Gemini Relay Status");
    println!("===================");
    println!();
    println!("Configuration:");
    println!("  Config file: {}", describe_source(config_path.as_deref()));
    println!();
    println!("Server settings:");
    println!("  Host: {}", config.server.host);
    println!("  Port: {}", config.server.port);
    println!();
    println!("Upstream:");
    println!("  Base URL: {}", config.upstream.base_url);
    println!("  Auth scheme: {:?}", config.upstream.auth_scheme);
    println!("  Credential: {}", redact(&config.upstream.api_key));
    println!("  Timeouts: connect {}s, request {}s", config.upstream.connect_timeout, config.upstream.request_timeout);
    println!();
    println!("Relay:");
    println!("  Channel capacity: {}", config.relay.channel_capacity);
    println!("  Idle timeout: {}s", config.relay.idle_timeout);

    if let Err(e) = config.validate() {
        println!();
        println!("Config problem: {}", e);
    }

    // Check if server is reachable
    println!();
    let url = format!("http://{}/healthz", config.server.bind_address().replace("0.0.0.0", "127.0.0.1"));
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("Server: RUNNING ✓");
        }
        _ => {
            println!("Server: NOT RUNNING");
        }
    }

    Ok(())
}

fn describe_source(config_path: Option<&Path>) -> String {
    match config_path {
        Some(path) => path.display().to_string(),
        None => "<none, using defaults>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_source_reports_resolved_file() {
        assert_eq!(describe_source(Some(Path::new("/etc/relay/custom.toml"))), "/etc/relay/custom.toml");
        assert_eq!(describe_source(None), "<none, using defaults>");
    }
}
