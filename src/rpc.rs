// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RPC Client
//!
//! `RpcCorrelationController` performs one request/response exchange:
//!
//! 1. declares an exclusive, broker-named reply queue (removed by the broker
//!    when the owning connection closes),
//! 2. stamps the request with a fresh time-ordered correlation id,
//! 3. registers a consumer on the reply queue,
//! 4. sends the request through the default exchange with `reply_to` set,
//! 5. takes the first reply carrying its correlation id through the usual
//!    validate, decode and handle steps, cancels the consumer, acks the reply
//!    and resolves to an `RpcResponse`.
//!
//! Replies with another correlation id and malformed replies are acked and
//! skipped. A reply that is not JSON is nacked and fails the call. The wait
//! is bounded by `RpcOptions::timeout`.

use crate::{
    channel::MessageChannel,
    consumer::{decode, ControllerKind, IncomingMessageController},
    dispatcher::escalate,
    errors::AmqpError,
    fault::{FatalFault, FaultPolicy},
    handler::{DataHandler, HandlerError, HandlerOutcome, RpcError},
    publisher::encode,
    queue::QueueDefinition,
    response::{ResponseEnvelope, RpcResponse},
    transport::{AmqpChannel, ConsumeOptions, Delivery, DeliveryStream, PublishOptions},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// How long a call waits for its reply unless configured otherwise
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcOptions {
    /// `None` waits for the reply indefinitely
    pub timeout: Option<Duration>,
}

impl Default for RpcOptions {
    fn default() -> Self {
        RpcOptions {
            timeout: Some(DEFAULT_RPC_TIMEOUT),
        }
    }
}

impl RpcOptions {
    pub fn timeout(timeout: Duration) -> Self {
        RpcOptions {
            timeout: Some(timeout),
        }
    }

    pub fn no_timeout() -> Self {
        RpcOptions { timeout: None }
    }
}

/// Default reply handler: unwraps the `ResponseEnvelope` so its status,
/// response and error reach the `RpcResponse`. Content that is not an
/// envelope is passed through unchanged.
pub struct ReplyPassThrough;

#[async_trait]
impl DataHandler for ReplyPassThrough {
    async fn handle(&self, content: Value) -> HandlerOutcome {
        match serde_json::from_value::<ResponseEnvelope>(content.clone()) {
            Ok(envelope) => HandlerOutcome {
                result: envelope.response,
                error: envelope.error.map(|err| {
                    HandlerError::Rpc(RpcError {
                        message: err.message,
                        code: err.code,
                    })
                }),
                code: Some(envelope.status),
            },
            Err(_) => HandlerOutcome::ok(content),
        }
    }
}

pub(crate) fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Client side of one RPC exchange.
pub struct RpcCorrelationController {
    channel: Arc<dyn AmqpChannel>,
    faults: Arc<dyn FaultPolicy>,
    handler: Arc<dyn DataHandler>,
    options: RpcOptions,
}

impl RpcCorrelationController {
    /// Creates a controller for calls on `channel`.
    ///
    /// # Parameters
    /// * `channel` - Channel used for the reply queue, the request and the reply consumer
    /// * `faults` - Receives failed acks and handler panics
    /// * `handler` - Turns the reply into an outcome; `None` uses `ReplyPassThrough`
    /// * `options` - Timeout of each call
    pub fn new(
        channel: Arc<dyn AmqpChannel>,
        faults: Arc<dyn FaultPolicy>,
        handler: Option<Arc<dyn DataHandler>>,
        options: RpcOptions,
    ) -> Self {
        RpcCorrelationController {
            channel,
            faults,
            handler: handler.unwrap_or_else(|| Arc::new(ReplyPassThrough)),
            options,
        }
    }

    /// Sends `payload` to `queue` and waits for the matching reply.
    ///
    /// # Parameters
    /// * `queue` - Queue of the RPC server, addressed through the default exchange
    /// * `payload` - Request body, sent as JSON
    ///
    /// # Returns
    /// The response built from the reply, or `AmqpError::RpcTimeout`,
    /// `AmqpError::ParsePayloadError` for a reply that is not JSON, or
    /// `AmqpError::Fatal` after a fault was reported
    pub async fn call<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
    ) -> Result<RpcResponse, AmqpError> {
        let data = encode(payload)?;

        let reply_queue = self
            .channel
            .assert_queue(&QueueDefinition::new("").exclusive())
            .await?;
        let correlation_id = new_correlation_id();

        let (consumer_tag, mut replies) = self
            .channel
            .consume(&reply_queue, ConsumeOptions::default())
            .await?;

        let controller = IncomingMessageController::new(
            &reply_queue,
            ControllerKind::RpcResult,
            self.channel.clone(),
            self.handler.clone(),
        );

        let options = PublishOptions::default()
            .persistent()
            .correlation_id(&correlation_id)
            .reply_to(&reply_queue);

        debug!(queue, correlation_id = %correlation_id, reply_queue = %reply_queue, "sending rpc request");

        let sent = self.channel.send_to_queue(queue, data, options).await;
        if !matches!(sent, Ok(true)) {
            error!(queue, correlation_id = %correlation_id, "rpc request was not sent");
            self.cancel(&consumer_tag).await;
            return Err(sent.err().unwrap_or(AmqpError::PublishingError));
        }

        let waiting = self.await_reply(&controller, &mut replies, &correlation_id);
        let reply = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, waiting).await {
                Ok(reply) => reply,
                Err(_) => {
                    error!(queue, correlation_id = %correlation_id, "rpc reply timed out");
                    Err(AmqpError::RpcTimeout(queue.to_owned()))
                }
            },
            None => waiting.await,
        };

        self.cancel(&consumer_tag).await;

        let (delivery, outcome) = reply?;
        self.settle(controller.ack(&delivery).await).await?;

        Ok(RpcResponse::from_outcome(outcome))
    }

    /// Waits for the first valid reply carrying `correlation_id` and runs it
    /// through the handler. The reply is left unacked.
    async fn await_reply(
        &self,
        controller: &IncomingMessageController,
        replies: &mut DeliveryStream,
        correlation_id: &str,
    ) -> Result<(Delivery, HandlerOutcome), AmqpError> {
        while let Some(result) = replies.next().await {
            let delivery = match result {
                Ok(delivery) => delivery,
                Err(err) => {
                    error!(error = err.to_string(), "errors consume rpc reply");
                    continue;
                }
            };

            if let Err(err) = controller.validate(&delivery) {
                warn!(error = err.to_string(), "skipping invalid rpc reply");
                self.settle(controller.ack(&delivery).await).await?;
                continue;
            }

            if delivery.properties.correlation_id.as_deref() != Some(correlation_id) {
                warn!(
                    expected = correlation_id,
                    received = ?delivery.properties.correlation_id,
                    "skipping rpc reply for another request"
                );
                self.settle(controller.ack(&delivery).await).await?;
                continue;
            }

            let content = match decode(&delivery) {
                Ok(content) => content,
                Err(err) => {
                    error!(error = err.to_string(), "error json parse rpc reply");
                    self.settle(controller.reject(&delivery).await).await?;
                    return Err(err);
                }
            };

            let outcome = match controller.handle(content).await {
                Ok(outcome) => outcome,
                Err(fault) => return Err(escalate(&self.faults, fault).await),
            };

            return Ok((delivery, outcome));
        }

        Err(AmqpError::ConsumerError("rpc reply consumer closed".to_owned()))
    }

    /// Reports a failed ack or nack to the fault policy.
    async fn settle(&self, result: Result<(), FatalFault>) -> Result<(), AmqpError> {
        match result {
            Ok(()) => Ok(()),
            Err(fault) => Err(escalate(&self.faults, fault).await),
        }
    }

    async fn cancel(&self, consumer_tag: &str) {
        if let Err(err) = self.channel.cancel(consumer_tag).await {
            error!(error = err.to_string(), consumer_tag, "error to cancel rpc consumer");
        }
    }
}

impl MessageChannel {
    /// Performs an RPC call to `queue` on this channel.
    ///
    /// Without a handler the reply envelope is unwrapped by `ReplyPassThrough`.
    pub async fn get_result_from_rpc<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        handler: Option<Arc<dyn DataHandler>>,
        options: RpcOptions,
    ) -> Result<RpcResponse, AmqpError> {
        RpcCorrelationController::new(self.channel.clone(), self.faults.clone(), handler, options)
            .call(queue, payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::tests::message_channel,
        fault::FaultSignal,
        testing::{feed, rpc_delivery, PanickingHandler, RecordingHandler},
        topology::tests::topology,
        transport::MockAmqpChannel,
    };
    use tokio::sync::mpsc::UnboundedReceiver;
    use mockall::{predicate::eq, Sequence};
    use serde_json::json;
    use std::{collections::HashSet, sync::Mutex};

    const REPLY_QUEUE: &str = "amq.gen-reply";
    const REPLY_TAG: &str = "ctag-reply";

    fn reply(tag: u64, content: &str, correlation_id: &str) -> Delivery {
        let mut delivery = rpc_delivery(tag, content, "", correlation_id);
        delivery.properties.reply_to = None;
        delivery
    }

    /// A channel whose reply queue receives what `respond` builds from the
    /// correlation id of the request.
    fn rpc_channel<F>(respond: F) -> (MockAmqpChannel, Arc<Mutex<Vec<PublishOptions>>>)
    where
        F: Fn(&str) -> Vec<Delivery> + Send + 'static,
    {
        let mut channel = MockAmqpChannel::new();
        let (tx, stream) = feed();
        let requests: Arc<Mutex<Vec<PublishOptions>>> = Arc::default();
        let captured = requests.clone();

        channel
            .expect_assert_queue()
            .withf(|def| def.name().is_empty() && def.is_exclusive() && !def.is_durable())
            .times(1)
            .returning(|_| Ok(REPLY_QUEUE.to_owned()));
        channel
            .expect_consume()
            .withf(|queue, _| queue == REPLY_QUEUE)
            .times(1)
            .return_once(move |_, _| Ok((REPLY_TAG.to_owned(), stream)));
        channel
            .expect_send_to_queue()
            .withf(|queue, _, _| queue == "rpc.test")
            .times(1)
            .returning(move |_, _, options| {
                let correlation_id = options.correlation_id.clone().unwrap_or_default();
                for delivery in respond(&correlation_id) {
                    let _ = tx.send(delivery);
                }
                captured.lock().unwrap().push(options);
                Ok(true)
            });

        (channel, requests)
    }

    #[tokio::test]
    async fn resolves_first_matching_reply_then_cancels_before_ack() {
        let (mut channel, requests) = rpc_channel(|corr| {
            vec![reply(9, r#"{"status":200,"response":"test"}"#, corr)]
        });
        let mut seq = Sequence::new();
        channel
            .expect_cancel()
            .with(eq(REPLY_TAG))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        channel
            .expect_ack()
            .with(eq(9))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let response = message_channel(channel)
            .get_result_from_rpc("rpc.test", &json!({"id": 1}), None, RpcOptions::default())
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.response_data(), &json!("test"));

        let requests = requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.reply_to.as_deref(), Some(REPLY_QUEUE));
        assert_eq!(request.delivery_mode, Some(2));
        assert!(request.correlation_id.is_some());
    }

    #[tokio::test]
    async fn error_envelope_reaches_the_caller() {
        let (mut channel, _) = rpc_channel(|corr| {
            vec![reply(
                1,
                r#"{"status":404,"response":null,"error":{"message":"missing","code":404,"info":null}}"#,
                corr,
            )]
        });
        channel.expect_cancel().times(1).returning(|_| Ok(()));
        channel.expect_ack().times(1).returning(|_| Ok(()));

        let response = message_channel(channel)
            .get_result_from_rpc("rpc.test", &json!({}), None, RpcOptions::default())
            .await
            .unwrap();

        assert!(!response.is_success());
        assert_eq!(response.code(), 404);
        assert_eq!(response.error_message(), Some("missing"));
    }

    #[tokio::test]
    async fn replies_for_other_requests_are_skipped() {
        let (mut channel, _) = rpc_channel(|corr| {
            vec![
                reply(1, r#"{"status":200,"response":"stale"}"#, "someone-else"),
                reply(2, "", corr),
                reply(3, r#"{"status":200,"response":"mine"}"#, corr),
            ]
        });
        channel.expect_ack().with(eq(1)).times(1).returning(|_| Ok(()));
        channel.expect_ack().with(eq(2)).times(1).returning(|_| Ok(()));
        channel.expect_ack().with(eq(3)).times(1).returning(|_| Ok(()));
        channel.expect_cancel().times(1).returning(|_| Ok(()));

        let response = message_channel(channel)
            .get_result_from_rpc("rpc.test", &json!({}), None, RpcOptions::default())
            .await
            .unwrap();

        assert_eq!(response.response_data(), &json!("mine"));
    }

    #[tokio::test]
    async fn custom_handler_decides_the_response() {
        let (mut channel, _) = rpc_channel(|corr| vec![reply(1, r#"{"any":"thing"}"#, corr)]);
        channel.expect_cancel().times(1).returning(|_| Ok(()));
        channel.expect_ack().times(1).returning(|_| Ok(()));
        let handler = RecordingHandler::new(HandlerOutcome::ok(json!("test")).with_code(200));

        let response = message_channel(channel)
            .get_result_from_rpc(
                "rpc.test",
                &json!({}),
                Some(handler.clone() as Arc<dyn DataHandler>),
                RpcOptions::default(),
            )
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(handler.seen(), vec![json!({"any": "thing"})]);
    }

    #[tokio::test]
    async fn undecodable_reply_is_rejected_and_fails_the_call() {
        let (mut channel, _) = rpc_channel(|corr| vec![reply(4, "not json", corr)]);
        channel
            .expect_nack()
            .with(eq(4), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));
        channel.expect_cancel().times(1).returning(|_| Ok(()));
        channel.expect_ack().never();

        let result = message_channel(channel)
            .get_result_from_rpc("rpc.test", &json!({}), None, RpcOptions::default())
            .await;

        assert!(matches!(result, Err(AmqpError::ParsePayloadError(_))));
    }

    fn signalled(channel: MockAmqpChannel) -> (MessageChannel, UnboundedReceiver<FatalFault>) {
        let (faults, rx) = FaultSignal::channel();
        let ch = MessageChannel::with_fault_policy(
            Arc::new(channel),
            Arc::new(topology()),
            Arc::new(faults),
        );
        (ch, rx)
    }

    #[tokio::test]
    async fn failed_reply_ack_reaches_the_fault_policy() {
        let (mut channel, _) =
            rpc_channel(|corr| vec![reply(6, r#"{"status":200,"response":"test"}"#, corr)]);
        channel.expect_cancel().times(1).returning(|_| Ok(()));
        channel
            .expect_ack()
            .with(eq(6))
            .times(1)
            .returning(|_| Err(AmqpError::AckMessageError));
        let (ch, mut faults) = signalled(channel);

        let result = ch
            .get_result_from_rpc("rpc.test", &json!({}), None, RpcOptions::default())
            .await;

        assert!(matches!(result, Err(AmqpError::Fatal(_))));
        assert_eq!(
            faults.recv().await,
            Some(FatalFault::new(REPLY_QUEUE, AmqpError::AckMessageError))
        );
        assert!(faults.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_reply_handler_reaches_the_fault_policy() {
        let (mut channel, _) = rpc_channel(|corr| vec![reply(1, "{}", corr)]);
        channel.expect_cancel().times(1).returning(|_| Ok(()));
        channel.expect_ack().never();
        let (ch, mut faults) = signalled(channel);

        let result = ch
            .get_result_from_rpc(
                "rpc.test",
                &json!({}),
                Some(Arc::new(PanickingHandler) as Arc<dyn DataHandler>),
                RpcOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(AmqpError::Fatal(_))));
        let fault = faults.recv().await.unwrap();
        assert!(fault.reason.contains("handler bug"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reply_times_out_and_cancels() {
        let (mut channel, _) = rpc_channel(|_| vec![]);
        channel.expect_cancel().with(eq(REPLY_TAG)).times(1).returning(|_| Ok(()));
        channel.expect_ack().never();

        let result = message_channel(channel)
            .get_result_from_rpc(
                "rpc.test",
                &json!({}),
                None,
                RpcOptions::timeout(Duration::from_millis(100)),
            )
            .await;

        assert_eq!(result, Err(AmqpError::RpcTimeout("rpc.test".to_owned())));
    }

    #[tokio::test]
    async fn refused_request_cancels_the_reply_consumer() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_assert_queue()
            .returning(|_| Ok(REPLY_QUEUE.to_owned()));
        channel
            .expect_consume()
            .return_once(|_, _| Ok((REPLY_TAG.to_owned(), feed().1)));
        channel
            .expect_send_to_queue()
            .returning(|_, _, _| Ok(false));
        channel.expect_cancel().times(1).returning(|_| Ok(()));

        let result = message_channel(channel)
            .get_result_from_rpc("rpc.test", &json!({}), None, RpcOptions::default())
            .await;

        assert_eq!(result, Err(AmqpError::PublishingError));
    }

    #[test]
    fn correlation_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_correlation_id()).collect();

        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn pass_through_keeps_non_envelope_content() {
        let outcome = ReplyPassThrough.handle(json!({"raw": true})).await;

        assert_eq!(outcome, HandlerOutcome::ok(json!({"raw": true})));
    }
}
