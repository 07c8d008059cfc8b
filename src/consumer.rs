// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Incoming Message Controller
//!
//! Every delivery goes through the same state machine:
//!
//! ```text
//! RECEIVED -> VALIDATED -> DECODED -> HANDLED -> [REPLIED ->] ACKNOWLEDGED
//!     |            |
//!     |            +-> REJECTED (not JSON: nacked without requeue)
//!     +-> DROPPED (invalid shape: acked without processing)
//! ```
//!
//! The variants differ only in what a valid delivery must carry and whether
//! a reply is sent, so they are selected by `ControllerKind` instead of
//! separate types. Failures of the controller itself (a panicking handler,
//! a failed ack, nack or reply) are returned as `FatalFault`.

use crate::{
    errors::AmqpError,
    fault::FatalFault,
    handler::{DataHandler, HandlerOutcome},
    response::{ResponseEnvelope, HANDLE_ERROR_PREFIX},
    transport::{AmqpChannel, Delivery, PublishOptions},
};
use futures_util::FutureExt;
use serde_json::Value;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tracing::{debug, error, warn};

/// Smallest content accepted: anything shorter cannot be a JSON document
pub const MIN_CONTENT_LEN: usize = 2;

/// What a delivery must carry and what happens after it was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// Plain consume: handle, then ack
    Consume,
    /// RPC server: needs `reply_to` and `correlation_id`; replies before the ack
    RpcConsume,
    /// RPC client reply: needs `correlation_id`
    RpcResult,
}

impl ControllerKind {
    pub(crate) fn validate(&self, delivery: &Delivery) -> Result<(), AmqpError> {
        if delivery.content.len() < MIN_CONTENT_LEN {
            return Err(AmqpError::InvalidMessage(format!(
                "\"content\" must contain at least {MIN_CONTENT_LEN} bytes"
            )));
        }

        let props = &delivery.properties;
        match self {
            ControllerKind::Consume => Ok(()),
            ControllerKind::RpcConsume => {
                required(&props.reply_to, "replyTo")?;
                required(&props.correlation_id, "correlationId")
            }
            ControllerKind::RpcResult => required(&props.correlation_id, "correlationId"),
        }
    }

    fn replies(&self) -> bool {
        matches!(self, ControllerKind::RpcConsume)
    }
}

fn required(value: &Option<String>, name: &str) -> Result<(), AmqpError> {
    match value {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(AmqpError::InvalidMessage(format!(
            "\"properties.{name}\" is required"
        ))),
    }
}

/// Where a delivery ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// No delivery: the broker cancelled the consumer
    Ignored,
    /// Invalid shape; acked and never handled
    Dropped,
    /// Not decodable; nacked without requeue
    Rejected,
    Acknowledged(HandlerOutcome),
    Replied(ResponseEnvelope),
}

/// Drives one delivery at a time through validation, decoding, the user
/// handler and the final ack or reply.
pub struct IncomingMessageController {
    queue: String,
    kind: ControllerKind,
    channel: Arc<dyn AmqpChannel>,
    handler: Arc<dyn DataHandler>,
}

impl IncomingMessageController {
    pub fn new(
        queue: &str,
        kind: ControllerKind,
        channel: Arc<dyn AmqpChannel>,
        handler: Arc<dyn DataHandler>,
    ) -> Self {
        IncomingMessageController {
            queue: queue.to_owned(),
            kind,
            channel,
            handler,
        }
    }

    pub async fn on_message(&self, delivery: Option<Delivery>) -> Result<Disposition, FatalFault> {
        let Some(delivery) = delivery else {
            return Ok(Disposition::Ignored);
        };

        debug!(
            queue = %self.queue,
            exchange = %delivery.exchange,
            "received message"
        );

        if let Err(err) = self.kind.validate(&delivery) {
            warn!(
                queue = %self.queue,
                error = err.to_string(),
                "removing message from queue"
            );
            self.ack(&delivery).await?;
            return Ok(Disposition::Dropped);
        }

        let content = match decode(&delivery) {
            Ok(content) => content,
            Err(err) => {
                error!(
                    queue = %self.queue,
                    error = err.to_string(),
                    "error json parse message content"
                );
                self.reject(&delivery).await?;
                return Ok(Disposition::Rejected);
            }
        };

        let outcome = self.handle(content).await?;

        if self.kind.replies() {
            let envelope = self.reply(&delivery, &outcome).await?;
            self.ack(&delivery).await?;
            return Ok(Disposition::Replied(envelope));
        }

        self.ack(&delivery).await?;
        Ok(Disposition::Acknowledged(outcome))
    }

    pub(crate) fn validate(&self, delivery: &Delivery) -> Result<(), AmqpError> {
        self.kind.validate(delivery)
    }

    /// Runs the user handler. RPC errors are expected and stay quiet.
    pub(crate) async fn handle(&self, content: Value) -> Result<HandlerOutcome, FatalFault> {
        let outcome = AssertUnwindSafe(self.handler.handle(content))
            .catch_unwind()
            .await
            .map_err(|panic| FatalFault::new(&self.queue, panic_message(panic)))?;

        if let Some(err) = &outcome.error {
            if !err.is_rpc() {
                error!(
                    queue = %self.queue,
                    error = format!("{HANDLE_ERROR_PREFIX}{err}"),
                    "handler failure"
                );
            }
        }

        Ok(outcome)
    }

    pub(crate) async fn ack(&self, delivery: &Delivery) -> Result<(), FatalFault> {
        self.channel
            .ack(delivery.delivery_tag)
            .await
            .map_err(|err| FatalFault::new(&self.queue, err))
    }

    pub(crate) async fn reject(&self, delivery: &Delivery) -> Result<(), FatalFault> {
        self.channel
            .nack(delivery.delivery_tag, false)
            .await
            .map_err(|err| FatalFault::new(&self.queue, err))
    }

    async fn reply(
        &self,
        delivery: &Delivery,
        outcome: &HandlerOutcome,
    ) -> Result<ResponseEnvelope, FatalFault> {
        let envelope = ResponseEnvelope::from_outcome(outcome);
        let payload =
            serde_json::to_vec(&envelope).map_err(|err| FatalFault::new(&self.queue, err))?;

        let props = &delivery.properties;
        let reply_to = props.reply_to.as_deref().unwrap_or_default();
        let options = PublishOptions {
            correlation_id: props.correlation_id.clone(),
            ..PublishOptions::default()
        };

        let confirmed = self
            .channel
            .send_to_queue(reply_to, payload, options)
            .await
            .map_err(|err| FatalFault::new(&self.queue, err))?;

        if !confirmed {
            error!(queue = %self.queue, reply_to, "reply was not confirmed");
        }

        Ok(envelope)
    }
}

pub(crate) fn decode(delivery: &Delivery) -> Result<Value, AmqpError> {
    serde_json::from_slice(&delivery.content)
        .map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return format!("handler panicked: {msg}");
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return format!("handler panicked: {msg}");
    }
    "handler panicked".to_owned()
}
