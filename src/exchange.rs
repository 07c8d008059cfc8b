// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Descriptors
//!
//! Exchanges are the routing entities messages are published to. This module
//! defines the exchange kinds a topology document may name and the resolved
//! `ExchangeDescriptor` used when asserting exchanges on a channel.

use lapin::types::{AMQPValue, LongString, ShortString};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Constant for the header field used to specify the delayed exchange type
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";
/// Broker-side exchange type provided by the delayed message plugin
pub const AMQP_DELAYED_EXCHANGE_KIND: &str = "x-delayed-message";

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - Custom: Any other exchange type understood by the broker, kept verbatim
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    Custom(String),
}

impl ExchangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Custom(kind) => kind,
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            other => ExchangeKind::Custom(other.to_owned()),
        })
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Custom(kind) => lapin::ExchangeKind::Custom(kind.clone()),
        }
    }
}

/// A fully resolved exchange. Identity is the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDescriptor {
    pub name: String,
    pub kind: ExchangeKind,
    pub delayed: bool,
}

impl ExchangeDescriptor {
    /// Creates a non-delayed exchange descriptor.
    pub fn new(name: &str, kind: ExchangeKind) -> ExchangeDescriptor {
        ExchangeDescriptor {
            name: name.to_owned(),
            kind,
            delayed: false,
        }
    }

    /// Marks the exchange as delayed.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn delayed(mut self) -> Self {
        self.delayed = true;
        self
    }

    /// The exchange type sent to the broker.
    ///
    /// Delayed exchanges are declared as `x-delayed-message`; their routing
    /// behavior is carried by the `x-delayed-type` argument instead.
    pub fn broker_kind(&self) -> lapin::ExchangeKind {
        if self.delayed {
            return lapin::ExchangeKind::Custom(AMQP_DELAYED_EXCHANGE_KIND.to_owned());
        }

        (&self.kind).into()
    }

    /// Declaration arguments for the exchange.
    pub fn arguments(&self) -> BTreeMap<ShortString, AMQPValue> {
        let mut params = BTreeMap::default();

        if self.delayed {
            params.insert(
                ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
                AMQPValue::LongString(LongString::from(self.kind.as_str())),
            );
        }

        params
    }
}
