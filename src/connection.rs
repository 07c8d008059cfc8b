// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channels over lapin
//!
//! This module establishes the broker connection and implements the
//! transport traits on top of lapin channels. Every channel it opens is
//! limited to one unacknowledged delivery and runs in publisher-confirm mode.

use crate::{
    config::ConnectionConfig,
    errors::AmqpError,
    exchange::ExchangeDescriptor,
    queue::QueueDefinition,
    transport::{
        AmqpChannel, AmqpConnection, ConnectionErrorHandler, ConsumeOptions, Delivery,
        DeliveryProperties, DeliveryStream, HeaderValue, Headers, PublishOptions,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString},
    uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

const PREFETCH_COUNT: u16 = 1;
const REPLY_SUCCESS: u16 = 200;

/// A lapin connection.
pub struct LapinConnection {
    conn: Connection,
}

impl LapinConnection {
    /// Connects to the broker described by `cfg`.
    ///
    /// The URI is assembled field by field so credentials never need escaping.
    pub async fn connect(cfg: &ConnectionConfig) -> Result<Arc<LapinConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.connection_name.clone()));

        let uri = AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: cfg.user.clone(),
                    password: cfg.password.clone(),
                },
                host: cfg.host.clone(),
                port: cfg.port,
            },
            vhost: cfg.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: Some(cfg.heartbeat),
                ..Default::default()
            },
            ..Default::default()
        };

        let conn = match Connection::connect_uri(uri, options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
        }?;
        debug!("amqp connected");

        Ok(Arc::new(LapinConnection { conn }))
    }
}

#[async_trait]
impl AmqpConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match self.conn.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }?;

        if let Err(err) = channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "error to configure prefetch");
            return Err(AmqpError::QoSDeclarationError(err.to_string()));
        }

        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
        {
            error!(error = err.to_string(), "error to enable publisher confirms");
            return Err(AmqpError::ChannelError);
        }

        debug!("channel created");
        Ok(Arc::new(LapinChannel { channel }))
    }

    fn on_error(&self, handler: ConnectionErrorHandler) {
        self.conn.on_error(move |err| {
            error!(error = err.to_string(), "amqp connection failure");
            handler(AmqpError::ConnectionError);
        });
    }

    fn is_connected(&self) -> bool {
        self.conn.status().connected()
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.conn.close(REPLY_SUCCESS, "OK").await.map_err(|err| {
            error!(error = err.to_string(), "error to close the connection");
            AmqpError::CloseError("connection".to_owned())
        })
    }
}

/// A lapin channel.
pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn assert_exchange(&self, exchange: &ExchangeDescriptor) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", exchange.name);

        match self
            .channel
            .exchange_declare(
                &exchange.name,
                exchange.broker_kind(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::from(exchange.arguments()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %exchange.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(exchange.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn assert_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        match self
            .channel
            .queue_declare(
                def.name(),
                QueueDeclareOptions {
                    passive: false,
                    durable: def.is_durable(),
                    exclusive: def.is_exclusive(),
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name().to_owned()))
            }
            Ok(queue) => {
                debug!("queue: {} was created", queue.name());
                Ok(queue.name().to_string())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        let confirm = match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &payload,
                basic_properties(options),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            Ok(confirm) => Ok(confirm),
        }?;

        match confirm.await {
            Err(err) => {
                error!(error = err.to_string(), "error waiting publisher confirm");
                Err(AmqpError::PublishingError)
            }
            Ok(confirmation) => Ok(!confirmation.is_nack()),
        }
    }

    async fn send_to_queue(
        &self,
        queue: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        self.publish("", queue, payload, options).await
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<(String, DeliveryStream), AmqpError> {
        let tag = format!("ctag-{}", Uuid::new_v4());

        let consumer = match self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_local: options.no_local,
                    no_ack: options.no_ack,
                    exclusive: options.exclusive,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let stream = consumer
            .map(|result| match result {
                Ok(delivery) => Ok(into_delivery(delivery)),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed();

        Ok((tag, stream))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to cancel the consumer");
                AmqpError::CancelConsumerError(consumer_tag.to_owned())
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to close the channel");
                AmqpError::CloseError("channel".to_owned())
            })
    }
}

fn basic_properties(options: PublishOptions) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(FieldTable::from(to_field_table(&options.headers)));

    if let Some(mode) = options.delivery_mode {
        props = props.with_delivery_mode(mode);
    }
    if let Some(id) = options.correlation_id {
        props = props.with_correlation_id(ShortString::from(id));
    }
    if let Some(reply_to) = options.reply_to {
        props = props.with_reply_to(ShortString::from(reply_to));
    }
    if let Some(expiration) = options.expiration {
        props = props.with_expiration(ShortString::from(expiration));
    }

    props
}

fn to_field_table(headers: &Headers) -> BTreeMap<ShortString, AMQPValue> {
    let mut btree = BTreeMap::new();

    for (key, value) in headers {
        let amqp_value = match value {
            HeaderValue::String(v) => AMQPValue::LongString(LongString::from(v.clone())),
            HeaderValue::Int(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
        };

        btree.insert(ShortString::from(key.clone()), amqp_value);
    }

    btree
}

fn from_field_table(table: Option<&FieldTable>) -> Headers {
    let mut headers = Headers::new();

    let Some(table) = table else {
        return headers;
    };

    for (key, value) in table.inner() {
        let value = match value {
            AMQPValue::LongString(v) => {
                HeaderValue::String(String::from_utf8_lossy(v.as_bytes()).into_owned())
            }
            AMQPValue::ShortString(v) => HeaderValue::String(v.to_string()),
            AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
            AMQPValue::ShortShortInt(v) => HeaderValue::Int(i64::from(*v)),
            AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i64::from(*v)),
            AMQPValue::ShortInt(v) => HeaderValue::Int(i64::from(*v)),
            AMQPValue::ShortUInt(v) => HeaderValue::Int(i64::from(*v)),
            AMQPValue::LongInt(v) => HeaderValue::Int(i64::from(*v)),
            AMQPValue::LongUInt(v) => HeaderValue::Int(i64::from(*v)),
            AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
            _ => continue,
        };

        headers.insert(key.to_string(), value);
    }

    headers
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let props = &delivery.properties;

    Delivery {
        delivery_tag: delivery.delivery_tag,
        exchange: delivery.exchange.to_string(),
        routing_key: delivery.routing_key.to_string(),
        redelivered: delivery.redelivered,
        properties: DeliveryProperties {
            correlation_id: props.correlation_id().as_ref().map(|id| id.to_string()),
            reply_to: props.reply_to().as_ref().map(|queue| queue.to_string()),
            headers: from_field_table(props.headers().as_ref()),
        },
        content: delivery.data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_survive_field_table_conversion() {
        let mut headers = Headers::new();
        headers.insert("x-delay".to_owned(), HeaderValue::Int(5000));
        headers.insert("traceparent".to_owned(), HeaderValue::from("00-abc-def-01"));
        headers.insert("retry".to_owned(), HeaderValue::Bool(true));

        let table = FieldTable::from(to_field_table(&headers));

        assert_eq!(from_field_table(Some(&table)), headers);
    }

    #[test]
    fn publish_options_map_to_properties() {
        let props = basic_properties(
            PublishOptions::default()
                .persistent()
                .correlation_id("corr-1")
                .reply_to("amq.gen-1"),
        );

        assert_eq!(props.delivery_mode(), &Some(2));
        assert_eq!(props.correlation_id(), &Some(ShortString::from("corr-1")));
        assert_eq!(props.reply_to(), &Some(ShortString::from("amq.gen-1")));
        assert_eq!(
            props.content_type(),
            &Some(ShortString::from(JSON_CONTENT_TYPE))
        );
    }
}
