use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Parser, Debug)]
#[command(version = crate::version::get_version_info())]
pub struct Cli {
    #[clap(long, default_value = "callbridge.toml")]
    pub conf: Option<String>,

    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug)]
pub enum Role {
    /// Run the host engine next to the device telephony stack
    Host,
    /// Connect to a host and mirror its calls
    Client {
        /// Host control address, e.g. 192.168.1.20:8080
        #[clap(long)]
        server: Option<String>,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub host: HostConfig,
    pub client: ClientConfig,
    /// Number to display-name table consumed by the static contact resolver.
    pub contacts: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HostConfig {
    pub addr: String,
    pub control_port: u16,
    pub audio_port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_string(),
            control_port: 8080,
            audio_port: 8081,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// Host control address, `ip:port`.
    pub server: Option<String>,
    /// The audio socket dials the same host on this port.
    pub audio_port: u16,
    pub audio_retry_count: u32,
    pub audio_retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            audio_port: 8081,
            audio_retry_count: 5,
            audio_retry_delay_ms: 1000,
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path, e))?;
        toml::from_str(&content).map_err(|e| anyhow!("Failed to parse config {}: {}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
log_level = "debug"

[host]
addr = "127.0.0.1"
control_port = 9090

[client]
server = "192.168.1.20:9090"
audio_retry_count = 2

[contacts]
"+15551234567" = "Alice"
"#
        )
        .unwrap();

        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.host.addr, "127.0.0.1");
        assert_eq!(config.host.control_port, 9090);
        // defaults fill in the rest
        assert_eq!(config.host.audio_port, 8081);
        assert_eq!(config.client.audio_retry_count, 2);
        assert_eq!(config.client.audio_retry_delay_ms, 1000);
        assert_eq!(config.contacts.get("+15551234567").unwrap(), "Alice");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.host.control_port, 8080);
        assert_eq!(config.host.audio_port, 8081);
        assert_eq!(config.client.audio_retry_count, 5);
        assert!(config.client.server.is_none());
    }
}
