//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use telemetry_core::Config;

/// Server configuration loaded from YAML with environment overrides.
///
/// The file uses the bridge's own layout (`bind_port`, `broker`,
/// `normalizer`, `broadcast`, `store`, `gateway`); any section may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub bridge: Config,
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `TELEMETRY_*` overrides obtained through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let bridge = &mut self.bridge;

        if let Some(val) = lookup("TELEMETRY_BIND_PORT") {
            match val.parse() {
                Ok(port) => bridge.bind_port = port,
                Err(_) => log::warn!("Ignoring invalid TELEMETRY_BIND_PORT: {}", val),
            }
        }

        if let Some(val) = lookup("TELEMETRY_BROKER_HOST") {
            bridge.broker.host = val;
        }

        if let Some(val) = lookup("TELEMETRY_BROKER_PORT") {
            match val.parse() {
                Ok(port) => bridge.broker.port = port,
                Err(_) => log::warn!("Ignoring invalid TELEMETRY_BROKER_PORT: {}", val),
            }
        }

        if let Some(val) = lookup("TELEMETRY_BROKER_USERNAME") {
            bridge.broker.username = Some(val);
        }

        if let Some(val) = lookup("TELEMETRY_BROKER_PASSWORD") {
            bridge.broker.password = Some(val);
        }

        if let Some(val) = lookup("TELEMETRY_BROKER_TOPICS") {
            bridge.broker.topics = val
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        // Note: TELEMETRY_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Sets the bind port (CLI override).
    pub fn set_bind_port(&mut self, port: u16) {
        self.bridge.bind_port = port;
    }

    /// Sets the history directory (CLI override).
    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.bridge.store.data_dir = Some(dir);
    }

    /// Converts to telemetry-core's Config type.
    pub fn into_core_config(self) -> Config {
        self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn write_yaml(content: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let file = write_yaml(
            "bind_port: 8080\nbroker:\n  host: broker.local\n  topics: [\"plant/+/data\"]\n",
        );
        let config = ServerConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.bridge.bind_port, 8080);
        assert_eq!(config.bridge.broker.host, "broker.local");
        assert_eq!(config.bridge.broker.port, 1883);
        assert_eq!(config.bridge.broker.topics, vec!["plant/+/data".to_string()]);
        assert_eq!(config.bridge.store.default_query_limit, 300);
        assert!(config.bridge.validate().is_ok());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let result = ServerConfig::load(Some(Path::new("/nonexistent/telemetry.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let file = write_yaml("broker: [not, a, map");
        assert!(ServerConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TELEMETRY_BIND_PORT", "9000"),
            ("TELEMETRY_BROKER_HOST", "10.0.0.5"),
            ("TELEMETRY_BROKER_PORT", "not-a-port"),
            ("TELEMETRY_BROKER_USERNAME", "bridge"),
            ("TELEMETRY_BROKER_TOPICS", "a/b, c/d ,"),
        ]);
        let mut config = ServerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.bridge.bind_port, 9000);
        assert_eq!(config.bridge.broker.host, "10.0.0.5");
        assert_eq!(config.bridge.broker.port, 1883);
        assert_eq!(config.bridge.broker.username.as_deref(), Some("bridge"));
        assert_eq!(config.bridge.broker.password, None);
        assert_eq!(
            config.bridge.broker.topics,
            vec!["a/b".to_string(), "c/d".to_string()]
        );
    }

    #[test]
    fn cli_setters_apply() {
        let mut config = ServerConfig::default();
        config.set_bind_port(4000);
        config.set_data_dir(PathBuf::from("/var/lib/telemetry"));
        let core = config.into_core_config();
        assert_eq!(core.bind_port, 4000);
        assert_eq!(core.store.data_dir, Some(PathBuf::from("/var/lib/telemetry")));
    }
}
