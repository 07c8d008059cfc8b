// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport Seam
//!
//! The engine talks to the broker only through `AmqpConnection` and
//! `AmqpChannel`. `crate::connection` implements them over lapin; tests use
//! the generated mocks.
//!
//! Deliveries are surfaced as a stream per consumer. A consumer task drains
//! its stream sequentially, so deliveries of one channel are never handled
//! concurrently.

use crate::{errors::AmqpError, exchange::ExchangeDescriptor, queue::QueueDefinition};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::{collections::BTreeMap, sync::Arc};

/// AMQP delivery mode of a message that survives a broker restart
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A header value carried by a published or delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

/// Message properties the engine reads from a delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryProperties {
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub headers: Headers,
}

/// A message handed to a consumer by the broker.
///
/// Lives until it is acknowledged through the channel it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub content: Vec<u8>,
    pub properties: DeliveryProperties,
}

/// Options applied to a single publish or default-exchange send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// `None` leaves the choice to the caller of the transport:
    /// topology publishes default to persistent, direct sends to transient
    pub delivery_mode: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub headers: Headers,
}

impl PublishOptions {
    pub fn persistent(mut self) -> Self {
        self.delivery_mode = Some(PERSISTENT_DELIVERY_MODE);
        self
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.correlation_id = Some(id.to_owned());
        self
    }

    pub fn reply_to(mut self, queue: &str) -> Self {
        self.reply_to = Some(queue.to_owned());
        self
    }

    pub fn header<V: Into<HeaderValue>>(mut self, key: &str, value: V) -> Self {
        self.headers.insert(key.to_owned(), value.into());
        self
    }
}

/// Options applied when a consumer is registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Called with the failure when an established connection breaks.
pub type ConnectionErrorHandler = Box<dyn Fn(AmqpError) + Send + Sync>;

/// A broker channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Declares a durable exchange.
    async fn assert_exchange(&self, exchange: &ExchangeDescriptor) -> Result<(), AmqpError>;

    /// Declares a queue and returns its name, as assigned by the broker when
    /// the definition's name is empty.
    async fn assert_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Publishes and waits for the broker confirm. `Ok(false)` means the
    /// broker refused the message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError>;

    /// Sends through the default exchange directly to `queue`.
    async fn send_to_queue(
        &self,
        queue: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError>;

    /// Registers a consumer and returns its tag with the delivery stream.
    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<(String, DeliveryStream), AmqpError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A broker connection shared by every channel of a process.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpConnection: Send + Sync {
    /// Opens a channel with a prefetch of one unacknowledged delivery.
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError>;

    /// Registers the handler invoked when the connection fails, replacing
    /// any previous one.
    fn on_error(&self, handler: ConnectionErrorHandler);

    /// Whether the connection is open.
    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), AmqpError>;
}
