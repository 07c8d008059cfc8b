// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Declarative Topology
//!
//! This module loads the topology document and resolves named references into
//! the descriptors the channel asserts and publishes with.
//!
//! The document has four top-level mappings:
//!
//! ```json
//! {
//!   "exchanges": { "orders": { "type": "topic", "delay": false } },
//!   "events":    { "order.created": { "exchange": "orders", "routing-key": "order.created" } },
//!   "queues":    { "billing": ["order.created"] },
//!   "rpc":       { "rpc.billing": { "exchange": "rpc", "routing-key": "billing" } }
//! }
//! ```
//!
//! Unknown names are never defaulted: every resolver fails with
//! `ConfigError::NotFound` on the first lookup of an absent name.

use crate::{
    errors::{ConfigError, TopologyEntity},
    exchange::{ExchangeDescriptor, ExchangeKind},
    queue::{EventDescriptor, QueueTopology, RpcQueueTopology},
};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, str::FromStr};
use tracing::{debug, error};

/// An `exchanges` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExchangeDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delay: bool,
}

/// An `events` or `rpc` entry.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BindingDeclaration {
    pub exchange: String,
    #[serde(rename = "routing-key")]
    pub routing_key: String,
}

/// The parsed topology document.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TopologyConfig {
    #[serde(default)]
    exchanges: HashMap<String, ExchangeDeclaration>,
    #[serde(default)]
    events: HashMap<String, BindingDeclaration>,
    #[serde(default)]
    queues: HashMap<String, Vec<String>>,
    #[serde(default)]
    rpc: HashMap<String, BindingDeclaration>,
}

impl FromStr for TopologyConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(|err| {
            error!(error = err.to_string(), "failure to parse topology config");
            ConfigError::Parse(err.to_string())
        })
    }
}

impl TopologyConfig {
    /// Reads and parses the topology document at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<TopologyConfig, ConfigError> {
        let path = path.as_ref();
        debug!("loading topology config: {}", path.display());

        if !path.exists() {
            error!(path = %path.display(), "config file does not exist");
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let raw = fs::read_to_string(path).map_err(|err| {
            error!(error = err.to_string(), "failure to read topology config");
            ConfigError::Parse(err.to_string())
        })?;

        raw.parse()
    }

    /// Resolves an exchange by name.
    pub fn resolve_exchange(&self, name: &str) -> Result<ExchangeDescriptor, ConfigError> {
        let Some(decl) = self.exchanges.get(name) else {
            return Err(ConfigError::not_found(TopologyEntity::Exchange, name));
        };

        let kind = decl.kind.parse().unwrap_or_default();

        Ok(ExchangeDescriptor {
            name: name.to_owned(),
            kind,
            delayed: decl.delay,
        })
    }

    /// Resolves an event and the exchange it publishes to.
    pub fn resolve_event(&self, name: &str) -> Result<EventDescriptor, ConfigError> {
        let Some(decl) = self.events.get(name) else {
            return Err(ConfigError::not_found(TopologyEntity::Event, name));
        };

        Ok(EventDescriptor {
            name: name.to_owned(),
            routing_key: decl.routing_key.clone(),
            exchange: self.resolve_exchange(&decl.exchange)?,
        })
    }

    /// Resolves a queue with every event it listens to, in declared order.
    pub fn resolve_queue(&self, name: &str) -> Result<QueueTopology, ConfigError> {
        let Some(event_names) = self.queues.get(name) else {
            return Err(ConfigError::not_found(TopologyEntity::Queue, name));
        };

        let listen_events = event_names
            .iter()
            .map(|event| self.resolve_event(event))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QueueTopology {
            name: name.to_owned(),
            listen_events,
        })
    }

    /// Resolves an RPC queue.
    ///
    /// The RPC exchange is referenced by name only and is always a
    /// non-delayed direct exchange.
    pub fn resolve_rpc_queue(&self, name: &str) -> Result<RpcQueueTopology, ConfigError> {
        let Some(decl) = self.rpc.get(name) else {
            return Err(ConfigError::not_found(TopologyEntity::RpcQueue, name));
        };

        Ok(RpcQueueTopology {
            name: name.to_owned(),
            routing_key: decl.routing_key.clone(),
            exchange: ExchangeDescriptor::new(&decl.exchange, ExchangeKind::Direct),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TOPOLOGY: &str = r#"{
        "exchanges": {
            "test": { "type": "direct", "delay": false },
            "audit": { "type": "topic", "delay": true }
        },
        "events": {
            "test.event": { "exchange": "test", "routing-key": "test.key" },
            "audit.event": { "exchange": "audit", "routing-key": "audit.#" },
            "broken.event": { "exchange": "missing", "routing-key": "broken" }
        },
        "queues": {
            "test": ["test.event"],
            "fanned": ["test.event", "audit.event"],
            "broken": ["test.event", "broken.event"],
            "batch": ["test.event"]
        },
        "rpc": {
            "rpc.test": { "exchange": "rpc", "routing-key": "rpc.test" }
        }
    }"#;

    pub(crate) fn topology() -> TopologyConfig {
        TOPOLOGY.parse().unwrap()
    }

    #[test]
    fn resolves_exchange() {
        let exchange = topology().resolve_exchange("audit").unwrap();

        assert_eq!(exchange.name, "audit");
        assert_eq!(exchange.kind, ExchangeKind::Topic);
        assert!(exchange.delayed);
    }

    #[test]
    fn resolves_queue_events_in_declared_order() {
        let queue = topology().resolve_queue("fanned").unwrap();

        let names: Vec<_> = queue.listen_events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["test.event", "audit.event"]);
        assert_eq!(queue.listen_events[1].routing_key, "audit.#");
        assert_eq!(queue.listen_events[1].exchange.name, "audit");
    }

    #[test]
    fn resolution_is_deterministic() {
        let config = topology();

        assert_eq!(
            config.resolve_queue("fanned").unwrap(),
            config.resolve_queue("fanned").unwrap()
        );
        assert_eq!(
            config.resolve_rpc_queue("rpc.test").unwrap(),
            config.resolve_rpc_queue("rpc.test").unwrap()
        );
    }

    #[test]
    fn unknown_names_are_not_found() {
        let config = topology();

        assert_eq!(
            config.resolve_exchange("nope"),
            Err(ConfigError::not_found(TopologyEntity::Exchange, "nope"))
        );
        assert_eq!(
            config.resolve_event("nope"),
            Err(ConfigError::not_found(TopologyEntity::Event, "nope"))
        );
        assert_eq!(
            config.resolve_queue("nope"),
            Err(ConfigError::not_found(TopologyEntity::Queue, "nope"))
        );
        assert_eq!(
            config.resolve_rpc_queue("nope"),
            Err(ConfigError::not_found(TopologyEntity::RpcQueue, "nope"))
        );
    }

    #[test]
    fn queue_with_event_on_missing_exchange_fails() {
        assert_eq!(
            topology().resolve_queue("broken"),
            Err(ConfigError::not_found(TopologyEntity::Exchange, "missing"))
        );
    }

    #[test]
    fn rpc_queue_uses_a_direct_exchange() {
        let rpc = topology().resolve_rpc_queue("rpc.test").unwrap();

        assert_eq!(rpc.routing_key, "rpc.test");
        assert_eq!(rpc.exchange, ExchangeDescriptor::new("rpc", ExchangeKind::Direct));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let config: TopologyConfig = r#"{ "queues": {} }"#.parse().unwrap();

        assert!(config.resolve_queue("test").is_err());
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = "{ not json".parse::<TopologyConfig>().unwrap_err();

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = TopologyConfig::from_file("/definitely/not/here.json").unwrap_err();

        assert_eq!(
            err,
            ConfigError::FileNotFound("/definitely/not/here.json".to_owned())
        );
    }
}
