// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! `AmqpError` covers every failure the engine can surface to a caller:
//! broker round trips, topology resolution, malformed deliveries and the
//! RPC client path. Topology lookups fail with the more specific
//! `ConfigError`, which converts into `AmqpError::Config`.

use std::fmt;
use thiserror::Error;

/// The kind of topology entry a lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEntity {
    Exchange,
    Event,
    Queue,
    RpcQueue,
}

impl fmt::Display for TopologyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyEntity::Exchange => write!(f, "Exchange"),
            TopologyEntity::Event => write!(f, "Event"),
            TopologyEntity::Queue => write!(f, "Queue"),
            TopologyEntity::RpcQueue => write!(f, "RPC Queue"),
        }
    }
}

/// Errors raised while loading or resolving the topology declaration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The topology file does not exist
    #[error("config file `{0}` does not exist")]
    FileNotFound(String),

    /// The topology document is not valid JSON or has the wrong shape
    #[error("failure to parse topology config: {0}")]
    Parse(String),

    /// A referenced name is absent from the declaration
    #[error("{entity} with name `{name}` doesn't exist in configuration")]
    NotFound {
        entity: TopologyEntity,
        name: String,
    },
}

impl ConfigError {
    pub(crate) fn not_found(entity: TopologyEntity, name: &str) -> Self {
        ConfigError::NotFound {
            entity,
            name: name.to_owned(),
        }
    }
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error serializing an outgoing payload
    #[error("failure to serialize payload: {0}")]
    SerializePayloadError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    /// The delivery does not have the shape the consumer requires
    #[error("received invalid message: {0}")]
    InvalidMessage(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error closing a channel or connection
    #[error("failure to close `{0}`")]
    CloseError(String),

    /// The batch callback failed; the batch consumer stops
    #[error("batch handler failure: {0}")]
    BatchHandlerError(String),

    /// Batch size must be at least one
    #[error("invalid batch size `{0}`")]
    InvalidBatchSize(usize),

    /// No reply was received within the RPC timeout
    #[error("rpc call to `{0}` timed out")]
    RpcTimeout(String),

    /// A consumer stopped after a fatal fault
    #[error("fatal error: {0}")]
    Fatal(String),

    /// No channel was opened for the given queue
    #[error("channel for queue `{0}` not found")]
    ChannelNotFound(String),

    /// Topology resolution failure
    #[error(transparent)]
    Config(#[from] ConfigError),
}
