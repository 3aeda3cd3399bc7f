//! Connector settings loaded from a TOML file.
//!
//! Credentials, identity and sensor names are required; broker address and
//! tuning keys fall back to the platform defaults.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::mqtt::config::{ClientOptions, DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT};

const CONFIG_DIR: &str = "ignite-connector";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ConnectorConfig {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub node_id: String,
    pub vendor: String,

    /// Sensor receiving operator status text
    pub status_topic: String,
    /// Sensor receiving sampled numeric values
    pub numeric_topic: String,
    /// Actuator the platform sends On/Off commands to
    pub actuator_topic: String,

    #[serde(default = "default_broker_host")]
    pub broker_host: String,
    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

fn default_broker_host() -> String {
    DEFAULT_BROKER_HOST.to_string()
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_publish_timeout_secs() -> u64 {
    30
}

fn default_request_capacity() -> usize {
    10
}

fn default_sample_interval_ms() -> u64 {
    1000
}

impl ConnectorConfig {
    /// `<config dir>/ignite-connector/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory on this platform"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        debug!("Loading connector config from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&content)?;
        info!(
            client_id = %config.client_id,
            node_id = %config.node_id,
            "Loaded connector config"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse connector config: {}", e))?;
        if config.request_capacity == 0 {
            return Err(eyre!("request_capacity must be at least 1"));
        }
        Ok(config)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs),
            request_capacity: self.request_capacity,
            subscriptions: self.subscriptions.clone(),
        }
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        username = "user"
        password = "secret"
        client_id = "client-1"
        node_id = "node-1"
        vendor = "Acme"
        status_topic = "Status"
        numeric_topic = "Level"
        actuator_topic = "Switch"
    "#;

    #[test]
    fn missing_optional_keys_take_platform_defaults() {
        let config = ConnectorConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.broker_host, "mqtt.ardich.com");
        assert_eq!(config.broker_port, 8883);
        assert_eq!(config.sample_interval(), Duration::from_secs(1));
        assert!(config.subscriptions.is_empty());

        let options = config.client_options();
        assert_eq!(options, ClientOptions::default());
    }

    #[test]
    fn overrides_reach_client_options() {
        let content = format!(
            "{}\nbroker_port = 1883\npublish_timeout_secs = 5\nsubscriptions = [\"client-1/#\"]\n",
            MINIMAL
        );
        let config = ConnectorConfig::from_toml_str(&content).unwrap();
        let options = config.client_options();

        assert_eq!(config.broker_port, 1883);
        assert_eq!(options.publish_timeout, Duration::from_secs(5));
        assert_eq!(options.subscriptions, vec!["client-1/#".to_string()]);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        assert!(ConnectorConfig::from_toml_str("client_id = \"x\"").is_err());
    }

    #[test]
    fn zero_request_capacity_is_rejected() {
        let content = format!("{}\nrequest_capacity = 0\n", MINIMAL);
        assert!(ConnectorConfig::from_toml_str(&content).is_err());
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = ConnectorConfig::load(file.path()).await.unwrap();
        assert_eq!(config.client_id, "client-1");
        assert_eq!(config.actuator_topic, "Switch");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConnectorConfig::load(&dir.path().join("absent.toml"))
            .await
            .is_err());
    }
}
