// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! Resolved queue-side descriptors: the events a queue listens to, the single
//! binding of an RPC queue, and `QueueDefinition`, the declaration options
//! handed to the transport when a queue is asserted.

use crate::exchange::ExchangeDescriptor;

/// One publish target: an exchange plus the routing key used on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: String,
    pub routing_key: String,
    pub exchange: ExchangeDescriptor,
}

/// A queue and the ordered events it subscribes to.
///
/// Every event implies a binding `(exchange, routing_key) -> queue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub name: String,
    pub listen_events: Vec<EventDescriptor>,
}

/// A queue served by an RPC handler, bound once to its exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcQueueTopology {
    pub name: String,
    pub routing_key: String,
    pub exchange: ExchangeDescriptor,
}

/// Declaration options of a RabbitMQ queue.
///
/// An empty name asks the broker to generate one; the generated name is
/// returned by `AmqpChannel::assert_queue`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            exclusive: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}
