// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Channel
//!
//! A `MessageChannel` owns one broker channel and applies the declarative
//! topology to it. Topology is asserted before the channel is used for the
//! queue: exchanges for publishing, queue plus bindings for consuming, or the
//! single RPC binding.
//!
//! Publishing lives in `crate::publisher`, consumption in
//! `crate::dispatcher` and the RPC client in `crate::rpc`.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDescriptor,
    fault::{ExitProcess, FaultPolicy},
    queue::QueueDefinition,
    topology::TopologyConfig,
    transport::AmqpChannel,
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

/// One broker channel bound to the topology.
#[derive(Clone)]
pub struct MessageChannel {
    pub(crate) channel: Arc<dyn AmqpChannel>,
    pub(crate) topology: Arc<TopologyConfig>,
    pub(crate) faults: Arc<dyn FaultPolicy>,
    declared_exchanges: Arc<Mutex<HashSet<String>>>,
}

impl MessageChannel {
    /// Creates a channel whose consumers terminate the process on a fatal fault.
    ///
    /// # Parameters
    /// * `channel` - The transport channel, usually from `AmqpConnection::create_channel`
    /// * `topology` - Topology the queue names are resolved against
    ///
    /// # Returns
    /// A channel using the `ExitProcess` fault policy
    pub fn new(channel: Arc<dyn AmqpChannel>, topology: Arc<TopologyConfig>) -> Self {
        Self::with_fault_policy(channel, topology, Arc::new(ExitProcess::default()))
    }

    /// Creates a channel reporting fatal faults of its consumers to `faults`.
    pub fn with_fault_policy(
        channel: Arc<dyn AmqpChannel>,
        topology: Arc<TopologyConfig>,
        faults: Arc<dyn FaultPolicy>,
    ) -> Self {
        MessageChannel {
            channel,
            topology,
            faults,
            declared_exchanges: Arc::default(),
        }
    }

    pub fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    /// Declares the exchange of every event the queue listens to.
    ///
    /// # Parameters
    /// * `queue` - Queue name from the `queues` section of the topology
    ///
    /// # Returns
    /// `Ok(())` once every exchange is declared, or the resolution or
    /// declaration error
    pub async fn assert_for_publish(&self, queue: &str) -> Result<(), AmqpError> {
        let info = self.topology.resolve_queue(queue)?;

        for event in &info.listen_events {
            self.assert_exchange(&event.exchange).await?;
            debug!(
                "assert exchange {} for publish to queue: {} with routing-key {}",
                event.exchange.name, queue, event.routing_key
            );
        }

        Ok(())
    }

    /// Declares the durable queue, then every exchange and binding in the
    /// queue's declared event order, one at a time.
    ///
    /// The first failing step stops the assertion; nothing is rolled back.
    ///
    /// # Parameters
    /// * `queue` - Queue name from the `queues` section of the topology
    pub async fn assert_for_consume(&self, queue: &str) -> Result<(), AmqpError> {
        let info = self.topology.resolve_queue(queue)?;

        self.channel
            .assert_queue(&QueueDefinition::new(queue).durable())
            .await?;

        for event in &info.listen_events {
            self.assert_exchange(&event.exchange).await?;

            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                queue, event.exchange.name, event.routing_key
            );
            self.channel
                .bind_queue(queue, &event.exchange.name, &event.routing_key)
                .await?;
        }

        debug!("assert queue for consume: {}", queue);
        Ok(())
    }

    /// Declares an RPC queue with its exchange and single binding.
    pub async fn assert_for_rpc(&self, queue: &str) -> Result<(), AmqpError> {
        let info = self.topology.resolve_rpc_queue(queue)?;

        self.channel
            .assert_queue(&QueueDefinition::new(queue).durable())
            .await?;
        self.assert_exchange(&info.exchange).await?;
        self.channel
            .bind_queue(queue, &info.exchange.name, &info.routing_key)
            .await?;

        debug!("assert queue for consume rpc: {}", queue);
        Ok(())
    }

    pub async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel.ack(delivery_tag).await
    }

    pub async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.channel.cancel(consumer_tag).await
    }

    pub async fn close(&self) -> Result<(), AmqpError> {
        self.channel.close().await
    }

    /// Declares an exchange once per channel.
    async fn assert_exchange(&self, exchange: &ExchangeDescriptor) -> Result<(), AmqpError> {
        if self.declared().contains(&exchange.name) {
            return Ok(());
        }

        self.channel.assert_exchange(exchange).await?;
        self.declared().insert(exchange.name.clone());

        Ok(())
    }

    fn declared(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.declared_exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
