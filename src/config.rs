// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Settings
//!
//! `ConnectionConfig` holds the broker address and credentials; `QueueList`
//! names the queues a client opens channels for at startup.

use crate::errors::ConfigError;
use dotenv::dotenv;
use serde::Deserialize;
use std::{env, path::Path};

pub const ENV_AMQP_HOST: &str = "AMQP_HOST";
pub const ENV_AMQP_PORT: &str = "AMQP_PORT";
pub const ENV_AMQP_USER: &str = "AMQP_USER";
pub const ENV_AMQP_PASSWORD: &str = "AMQP_PASSWORD";
pub const ENV_AMQP_VHOST: &str = "AMQP_VHOST";
pub const ENV_AMQP_HEARTBEAT: &str = "AMQP_HEARTBEAT";

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Heartbeat interval in seconds
    pub heartbeat: u16,
    /// Name reported to the broker for this connection
    pub connection_name: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            heartbeat: 60,
            connection_name: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

impl ConnectionConfig {
    /// Builds the settings from `AMQP_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Missing or unparsable variables keep their default value.
    pub fn from_env() -> ConnectionConfig {
        dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the `.env` style file at `path` into the environment, then
    /// builds the settings as `from_env` does.
    ///
    /// Variables already present in the environment are not overridden.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<ConnectionConfig, ConfigError> {
        let path = path.as_ref();
        if let Err(err) = dotenv::from_path(path) {
            return Err(match err {
                dotenv::Error::Io(_) => ConfigError::FileNotFound(path.display().to_string()),
                other => ConfigError::Parse(other.to_string()),
            });
        }

        Ok(Self::from_lookup(|key| env::var(key).ok()))
    }

    fn from_lookup<F>(lookup: F) -> ConnectionConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = ConnectionConfig::default();

        if let Some(host) = lookup(ENV_AMQP_HOST) {
            cfg.host = host;
        }
        if let Some(port) = lookup(ENV_AMQP_PORT).and_then(|p| p.parse().ok()) {
            cfg.port = port;
        }
        if let Some(user) = lookup(ENV_AMQP_USER) {
            cfg.user = user;
        }
        if let Some(password) = lookup(ENV_AMQP_PASSWORD) {
            cfg.password = password;
        }
        if let Some(vhost) = lookup(ENV_AMQP_VHOST) {
            cfg.vhost = vhost;
        }
        if let Some(heartbeat) = lookup(ENV_AMQP_HEARTBEAT).and_then(|h| h.parse().ok()) {
            cfg.heartbeat = heartbeat;
        }

        cfg
    }
}

/// Queue names a client prepares at startup, grouped by usage.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueList {
    pub publish: Vec<String>,
    pub consume: Vec<String>,
    pub rpc: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_AMQP_HOST, "rabbit"),
            (ENV_AMQP_PORT, "5673"),
            (ENV_AMQP_PASSWORD, "p@ss/word"),
            (ENV_AMQP_HEARTBEAT, "not-a-number"),
        ]);

        let cfg = ConnectionConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.host, "rabbit");
        assert_eq!(cfg.port, 5673);
        assert_eq!(cfg.user, "guest");
        assert_eq!(cfg.password, "p@ss/word");
        assert_eq!(cfg.heartbeat, 60);
    }

    #[test]
    fn env_file_is_loaded() {
        let path = env::temp_dir().join(format!("amqp-topology-{}.env", std::process::id()));
        std::fs::write(&path, "AMQP_VHOST=/from-dotenv\n").unwrap();

        let cfg = ConnectionConfig::from_env_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.vhost, "/from-dotenv");
    }

    #[test]
    fn missing_env_file_is_reported() {
        let result = ConnectionConfig::from_env_file("/definitely/not/here.env");

        assert_eq!(
            result,
            Err(ConfigError::FileNotFound("/definitely/not/here.env".to_owned()))
        );
    }

    #[test]
    fn queue_list_sections_are_optional() {
        let list: QueueList = serde_json::from_str(r#"{ "publish": ["test"] }"#).unwrap();

        assert_eq!(list.publish, vec!["test".to_owned()]);
        assert!(list.consume.is_empty());
        assert!(list.rpc.is_empty());
    }
}
