// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Client
//!
//! `AmqpClient` owns the broker connection and one `MessageChannel` per queue
//! name. Channels are created and their topology asserted up front from a
//! `QueueList`; every operation afterwards is addressed by queue name.
//!
//! The client remembers the consumer tag of every consumer it starts so that
//! `close` can shut down in order: cancel consumers, close channels, then
//! close the connection.

use crate::{
    channel::MessageChannel,
    config::{ConnectionConfig, QueueList},
    connection::LapinConnection,
    dispatcher::ConsumerHandle,
    errors::AmqpError,
    fault::{ExitProcess, FatalFault, FaultPolicy},
    handler::{BatchHandler, DataHandler, DeliveryHandler},
    response::RpcResponse,
    rpc::RpcOptions,
    topology::TopologyConfig,
    transport::{AmqpConnection, ConsumeOptions, PublishOptions},
};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::runtime::Handle;
use tracing::{debug, error};

/// Batch size used when the caller has no preference
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Name under which connection failures are reported to the fault policy
pub const CONNECTION_FAULT_SOURCE: &str = "connection";

/// A connection plus one channel per queue, addressed by queue name.
pub struct AmqpClient {
    connection: Arc<dyn AmqpConnection>,
    topology: Arc<TopologyConfig>,
    faults: Arc<dyn FaultPolicy>,
    channels: BTreeMap<String, MessageChannel>,
    consumers: Mutex<Vec<(String, String)>>,
}

impl AmqpClient {
    /// Connects to the broker and prepares a channel for every listed queue.
    ///
    /// Connection failures are reported to an `ExitProcess` fault policy;
    /// use `on_connection_error` to handle them differently.
    ///
    /// # Parameters
    /// * `cfg` - Broker address and credentials
    /// * `topology` - The topology every queue name is resolved against
    /// * `queues` - Queues to open channels for, grouped by usage
    ///
    /// # Returns
    /// A ready client, or the first connection, configuration or declaration error
    pub async fn connect(
        cfg: &ConnectionConfig,
        topology: TopologyConfig,
        queues: &QueueList,
    ) -> Result<AmqpClient, AmqpError> {
        let connection = LapinConnection::connect(cfg).await?;

        let mut client = AmqpClient::new(
            connection,
            Arc::new(topology),
            Arc::new(ExitProcess::default()),
        );
        client.report_connection_errors();
        client.init_channels(queues).await?;

        Ok(client)
    }

    /// Wraps an open connection. No channel is created until `init_channels`.
    ///
    /// # Parameters
    /// * `connection` - The broker connection
    /// * `topology` - Shared topology used by every channel
    /// * `faults` - Policy every consumer of this client reports fatal faults to
    pub fn new(
        connection: Arc<dyn AmqpConnection>,
        topology: Arc<TopologyConfig>,
        faults: Arc<dyn FaultPolicy>,
    ) -> AmqpClient {
        AmqpClient {
            connection,
            topology,
            faults,
            channels: BTreeMap::new(),
            consumers: Mutex::default(),
        }
    }

    /// Asserts the topology of each listed queue on its own channel:
    /// exchanges for `publish`, queue and bindings for `consume`, the RPC
    /// binding for `rpc`. A queue listed twice keeps its first channel.
    ///
    /// Unknown queue names fail before any channel is opened for them.
    pub async fn init_channels(&mut self, queues: &QueueList) -> Result<(), AmqpError> {
        for queue in &queues.publish {
            self.topology.resolve_queue(queue)?;
            self.open_channel(queue).await?.assert_for_publish(queue).await?;
        }

        for queue in &queues.consume {
            self.topology.resolve_queue(queue)?;
            self.open_channel(queue).await?.assert_for_consume(queue).await?;
        }

        for queue in &queues.rpc {
            self.topology.resolve_rpc_queue(queue)?;
            self.open_channel(queue).await?.assert_for_rpc(queue).await?;
        }

        Ok(())
    }

    /// Routes connection failures to the client's fault policy.
    ///
    /// Needs a running tokio runtime; without one failures are only logged.
    pub fn report_connection_errors(&self) {
        let Ok(runtime) = Handle::try_current() else {
            error!("no tokio runtime, connection failures will only be logged");
            return;
        };

        let faults = self.faults.clone();
        self.connection.on_error(Box::new(move |err| {
            let faults = faults.clone();
            runtime.spawn(async move {
                faults
                    .on_fatal(FatalFault::new(CONNECTION_FAULT_SOURCE, err))
                    .await;
            });
        }));
    }

    /// Replaces the connection failure handling with `handler`.
    pub fn on_connection_error<F>(&self, handler: F)
    where
        F: Fn(AmqpError) + Send + Sync + 'static,
    {
        self.connection.on_error(Box::new(handler));
    }

    /// Whether the broker connection is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    /// The channel prepared for `queue`.
    ///
    /// # Returns
    /// The channel, or `AmqpError::ChannelNotFound` when `queue` was not part
    /// of the `QueueList` given to `init_channels`
    pub fn channel(&self, queue: &str) -> Result<&MessageChannel, AmqpError> {
        self.channels.get(queue).ok_or_else(|| {
            error!(queue, "channel for queue not found");
            AmqpError::ChannelNotFound(queue.to_owned())
        })
    }

    /// Publishes `payload` to every event `queue` listens to.
    ///
    /// # Returns
    /// `Ok(true)` when every publish was confirmed by the broker
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        self.channel(queue)?.publish(queue, payload, options).await
    }

    /// Sends `payload` directly to `queue` through the default exchange.
    pub async fn send_to_queue<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<bool, AmqpError> {
        self.channel(queue)?.send_to_queue(queue, payload, options).await
    }

    /// Starts a consumer handing decoded content to `handler`.
    pub async fn consume(
        &self,
        queue: &str,
        handler: Arc<dyn DataHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        let handle = self.channel(queue)?.consume(queue, handler, options).await?;
        self.register(queue, &handle);
        Ok(handle)
    }

    /// Starts a consumer handing raw deliveries to `handler`, which settles
    /// them itself.
    pub async fn consume_raw(
        &self,
        queue: &str,
        handler: Arc<dyn DeliveryHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        let handle = self
            .channel(queue)?
            .consume_raw(queue, handler, options)
            .await?;
        self.register(queue, &handle);
        Ok(handle)
    }

    /// Starts an RPC server consumer replying with the handler outcome.
    pub async fn rpc_consume(
        &self,
        queue: &str,
        handler: Arc<dyn DataHandler>,
        options: ConsumeOptions,
    ) -> Result<ConsumerHandle, AmqpError> {
        let handle = self
            .channel(queue)?
            .rpc_consume(queue, handler, options)
            .await?;
        self.register(queue, &handle);
        Ok(handle)
    }

    /// Starts a batch consumer, see `MessageChannel::batch_consume`.
    ///
    /// # Parameters
    /// * `count` - Batch size; `None` uses `DEFAULT_BATCH_SIZE`
    pub async fn batch_consume(
        &self,
        queue: &str,
        handler: Arc<dyn BatchHandler>,
        options: ConsumeOptions,
        count: Option<usize>,
    ) -> Result<ConsumerHandle, AmqpError> {
        let count = count.unwrap_or(DEFAULT_BATCH_SIZE);
        let handle = self
            .channel(queue)?
            .batch_consume(queue, handler, options, count)
            .await?;
        self.register(queue, &handle);
        Ok(handle)
    }

    /// Performs an RPC call to `queue`, see `MessageChannel::get_result_from_rpc`.
    pub async fn get_result_from_rpc<T: Serialize + ?Sized>(
        &self,
        queue: &str,
        payload: &T,
        handler: Option<Arc<dyn DataHandler>>,
        options: RpcOptions,
    ) -> Result<RpcResponse, AmqpError> {
        self.channel(queue)?
            .get_result_from_rpc(queue, payload, handler, options)
            .await
    }

    /// Cancels every consumer started through this client, in start order.
    ///
    /// Failures are logged and do not stop the remaining cancellations.
    pub async fn cancel_all_consumers(&self) {
        let consumers = std::mem::take(&mut *self.consumers());

        for (queue, tag) in consumers {
            let Some(channel) = self.channels.get(&queue) else {
                continue;
            };

            match channel.cancel(&tag).await {
                Ok(()) => debug!(queue = %queue, consumer_tag = %tag, "consumer cancelled"),
                Err(err) => error!(
                    error = err.to_string(),
                    queue = %queue,
                    "error to cancel consumer"
                ),
            }
        }
    }

    /// Closes every channel. Failures are logged.
    pub async fn close_all_channels(&self) {
        for (queue, channel) in &self.channels {
            if let Err(err) = channel.close().await {
                error!(error = err.to_string(), queue = %queue, "error to close channel");
            }
        }
    }

    pub async fn close_channel(&self, queue: &str) -> Result<(), AmqpError> {
        self.channel(queue)?.close().await
    }

    /// Cancels consumers, closes channels, then closes the connection.
    ///
    /// # Returns
    /// The result of closing the connection
    pub async fn close(&self) -> Result<(), AmqpError> {
        self.cancel_all_consumers().await;
        self.close_all_channels().await;
        self.connection.close().await
    }

    async fn open_channel(&mut self, queue: &str) -> Result<&MessageChannel, AmqpError> {
        if !self.channels.contains_key(queue) {
            let raw = self.connection.create_channel().await?;
            let channel = MessageChannel::with_fault_policy(
                raw,
                self.topology.clone(),
                self.faults.clone(),
            );
            self.channels.insert(queue.to_owned(), channel);
            debug!(queue, "channel created");
        }

        self.channel(queue)
    }

    fn register(&self, queue: &str, handle: &ConsumerHandle) {
        self.consumers()
            .push((queue.to_owned(), handle.tag().to_owned()));
    }

    fn consumers(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
