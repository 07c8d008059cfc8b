// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumption Loops
//!
//! Every consumer is a spawned task draining the delivery stream of its
//! channel one delivery at a time, so no two deliveries of a channel are
//! ever handled concurrently. The task ends when the broker cancels the
//! consumer, or after the first fatal fault. A fatal fault (a panicking or
//! failing handler, a failed ack, nack or reply) is handed once to the
//! channel's `FaultPolicy` and then returned from `ConsumerHandle::join`.

use crate::{
    channel::MessageChannel,
    consumer::{panic_message, ControllerKind, IncomingMessageController},
    errors::AmqpError,
    fault::{FatalFault, FaultPolicy},
    handler::{BatchHandler, DataHandler, DeliveryHandler},
    otel,
    transport::{ConsumeOptions, Delivery},
};
use futures_util::{FutureExt, StreamExt};
use opentelemetry::{
    global::{self, BoxedSpan},
    trace::{Span, Status},
};
use std::{borrow::Cow, panic::AssertUnwindSafe, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// A running consumer.
pub struct ConsumerHandle {
    tag: String,
    task: JoinHandle<Result<(), AmqpError>>,
}

impl ConsumerHandle {
    /// The broker consumer tag, used to cancel the consumer.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the consumer task to end.
    ///
    /// # Returns
    /// `Ok(())` when the broker cancelled the consumer, otherwise the error
    /// that stopped it: `AmqpError::Fatal` for a fatal fault,
    /// `AmqpError::BatchHandlerError` for a failed batch.
    pub async fn join(self) -> Result<(), AmqpError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => {
                error!(error = err.to_string(), "consumer task failure");
                Err(AmqpError::InternalError)
            }
        }
    }
}

impl MessageChannel {
    /// Consumes `queue`, handing the decoded content of each delivery to `handler`.
    ///
    /// Invalid deliveries are acked and dropped, undecodable ones are nacked
    /// without requeue; everything else is acked once the handler returns.
    ///
    /// # Parameters
    /// * `queue` - Queue to consume, usually asserted with `assert_for_consume`
    /// * `handler` - Receives the JSON content of each delivery
    /// * `options` - Consumer flags passed to the broker
    ///
    /// # Returns
    /// The handle of the spawned consumer
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DataHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        self.spawn_controller(queue, ControllerKind::Consume, handler, options)
            .await
    }

    /// Consumes an RPC queue; the handler outcome is sent back to each
    /// request's `reply_to` queue.
    pub async fn rpc_consume(
        &self,
        queue: &str,
        handler: Arc<dyn DataHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        self.spawn_controller(queue, ControllerKind::RpcConsume, handler, options)
            .await
    }

    /// Consumes `queue` handing every delivery to `handler` untouched.
    ///
    /// The handler acknowledges deliveries itself. A handler error or panic
    /// is a fatal fault for the consumer.
    pub async fn consume_raw(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        let (tag, mut deliveries) = self.channel.consume(queue, options).await?;
        let faults = self.faults.clone();
        let queue = queue.to_owned();

        let task = tokio::spawn(async move {
            let tracer = global::tracer("amqp consumer");

            while let Some(result) = deliveries.next().await {
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(error = err.to_string(), queue = %queue, "errors consume msg");
                        continue;
                    }
                };

                let (_ctx, mut span) = otel::new_span(&delivery, &tracer, &queue);

                let failure = match AssertUnwindSafe(handler.handle_delivery(delivery))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {
                        span.set_status(Status::Ok);
                        continue;
                    }
                    Ok(Err(err)) => err.to_string(),
                    Err(panic) => panic_message(panic),
                };

                let fault = FatalFault::new(&queue, failure);
                record_fault(&mut span, &fault);
                return Err(escalate(&faults, fault).await);
            }

            debug!(queue = %queue, "consumer finished");
            Ok(())
        });

        Ok(ConsumerHandle { tag, task })
    }

    /// Consumes `queue` in batches of `count` raw deliveries.
    ///
    /// Each delivery is acked as it arrives. Once `count` deliveries are
    /// buffered the whole buffer is taken, leaving it empty, and handed to
    /// `handler`. The batch is not retried: a handler error or panic, like a
    /// failed ack, is reported to the fault policy and stops the consumer.
    ///
    /// # Parameters
    /// * `queue` - Queue to consume
    /// * `handler` - Receives each full batch
    /// * `options` - Consumer flags passed to the broker
    /// * `count` - Batch size, at least one
    ///
    /// # Returns
    /// The handle of the spawned consumer, or `AmqpError::InvalidBatchSize`
    /// when `count` is zero
    pub async fn batch_consume(
        &self,
        queue: &str,
        handler: Arc<dyn BatchHandler>,
        options: ConsumeOptions,
        count: usize,
    ) -> Result<ConsumerHandle, AmqpError> {
        if count == 0 {
            return Err(AmqpError::InvalidBatchSize(count));
        }

        let (tag, mut deliveries) = self.channel.consume(queue, options).await?;
        let channel = self.channel.clone();
        let faults = self.faults.clone();
        let queue = queue.to_owned();

        let task = tokio::spawn(async move {
            let mut buffer: Vec<Delivery> = Vec::with_capacity(count);

            while let Some(result) = deliveries.next().await {
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(error = err.to_string(), queue = %queue, "errors consume msg");
                        continue;
                    }
                };

                let delivery_tag = delivery.delivery_tag;
                buffer.push(delivery);

                if let Err(err) = channel.ack(delivery_tag).await {
                    return Err(escalate(&faults, FatalFault::new(&queue, err)).await);
                }

                if buffer.len() < count {
                    continue;
                }

                let batch = std::mem::take(&mut buffer);
                debug!(queue = %queue, size = batch.len(), "dispatching batch");

                match AssertUnwindSafe(handler.handle_batch(batch))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(error = err.to_string(), queue = %queue, "batch handler failure");
                        escalate(&faults, FatalFault::new(&queue, &err)).await;
                        return Err(AmqpError::BatchHandlerError(err.to_string()));
                    }
                    Err(panic) => {
                        let fault = FatalFault::new(&queue, panic_message(panic));
                        return Err(escalate(&faults, fault).await);
                    }
                }
            }

            Ok(())
        });

        Ok(ConsumerHandle { tag, task })
    }

    async fn spawn_controller(
        &self,
        queue: &str,
        kind: ControllerKind,
        handler: Arc<dyn DataHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        let (tag, mut deliveries) = self.channel.consume(queue, options).await?;
        let controller =
            IncomingMessageController::new(queue, kind, self.channel.clone(), handler);
        let faults = self.faults.clone();
        let queue = queue.to_owned();

        let task = tokio::spawn(async move {
            let tracer = global::tracer("amqp consumer");

            while let Some(result) = deliveries.next().await {
                let delivery = match result {
                    Ok(delivery) => delivery,
                    Err(err) => {
                        error!(error = err.to_string(), queue = %queue, "errors consume msg");
                        continue;
                    }
                };

                let (_ctx, mut span) = otel::new_span(&delivery, &tracer, &queue);

                match controller.on_message(Some(delivery)).await {
                    Ok(_) => span.set_status(Status::Ok),
                    Err(fault) => {
                        record_fault(&mut span, &fault);
                        return Err(escalate(&faults, fault).await);
                    }
                }
            }

            debug!(queue = %queue, "consumer finished");
            Ok(())
        });

        Ok(ConsumerHandle { tag, task })
    }
}

fn record_fault(span: &mut BoxedSpan, fault: &FatalFault) {
    span.record_error(fault);
    span.set_status(Status::Error {
        description: Cow::from(fault.reason.clone()),
    });
    span.end();
}

/// Hands `fault` to the policy and returns the error the consumer ends with.
pub(crate) async fn escalate(faults: &Arc<dyn FaultPolicy>, fault: FatalFault) -> AmqpError {
    let reason = fault.to_string();
    faults.on_fatal(fault).await;
    AmqpError::Fatal(reason)
}
