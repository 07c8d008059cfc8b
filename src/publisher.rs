// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publishing
//!
//! A publish fans the payload out to every `(exchange, routing key)` pair of
//! the events the queue listens to. The fan-out is best effort: a refused or
//! failed publish is logged, the remaining targets are still tried, and the
//! call reports `false`.

use crate::{
    channel::MessageChannel,
    errors::AmqpError,
    otel,
    transport::{PublishOptions, PERSISTENT_DELIVERY_MODE},
};
use serde::Serialize;
use tracing::{debug, error};

pub(crate) fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, AmqpError> {
    serde_json::to_vec(payload).map_err(|err| {
        error!(error = err.to_string(), "failure to serialize payload");
        AmqpError::SerializePayloadError(err.to_string())
    })
}

impl MessageChannel {
    /// Publishes `payload` to every event of the queue's topology.
    ///
    /// Messages are persistent unless `options` sets another delivery mode.
    /// The current trace context is added to the headers.
    ///
    /// # Parameters
    /// * `queue` - Queue name whose events are the publish targets
    /// * `payload` - Any serializable value, sent as JSON
    /// * `options` - Message properties
    ///
    /// # Returns
    /// `Ok(true)` only when every publish was confirmed by the broker
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        let info = self.topology.resolve_queue(queue)?;
        let data = encode(payload)?;

        let mut options = options;
        options.delivery_mode = options.delivery_mode.or(Some(PERSISTENT_DELIVERY_MODE));
        otel::inject_current(&mut options.headers);

        let mut published = true;

        for event in &info.listen_events {
            match self
                .channel
                .publish(
                    &event.exchange.name,
                    &event.routing_key,
                    data.clone(),
                    options.clone(),
                )
                .await
            {
                Ok(true) => debug!(
                    "message was published: {} {}",
                    event.exchange.name, event.routing_key
                ),
                Ok(false) => {
                    published = false;
                    error!(
                        exchange = %event.exchange.name,
                        routing_key = %event.routing_key,
                        "publish was not confirmed"
                    );
                }
                Err(err) => {
                    published = false;
                    error!(
                        error = err.to_string(),
                        exchange = %event.exchange.name,
                        routing_key = %event.routing_key,
                        "error publishing message"
                    );
                }
            }
        }

        Ok(published)
    }

    /// Sends `payload` straight to `queue` through the default exchange,
    /// bypassing the topology.
    pub async fn send_to_queue<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        let data = encode(payload)?;

        let mut options = options;
        otel::inject_current(&mut options.headers);

        self.channel.send_to_queue(queue, data, options).await
    }
}
