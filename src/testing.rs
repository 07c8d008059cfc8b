// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Fixtures shared by the unit tests.

use crate::{
    errors::AmqpError,
    handler::{BatchHandler, DataHandler, DeliveryHandler, HandlerError, HandlerOutcome},
    transport::{Delivery, DeliveryProperties, DeliveryStream},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub(crate) fn delivery(tag: u64, content: &str) -> Delivery {
    Delivery {
        delivery_tag: tag,
        content: content.as_bytes().to_vec(),
        ..Delivery::default()
    }
}

pub(crate) fn rpc_delivery(tag: u64, content: &str, reply_to: &str, correlation_id: &str) -> Delivery {
    Delivery {
        properties: DeliveryProperties {
            reply_to: Some(reply_to.to_owned()),
            correlation_id: Some(correlation_id.to_owned()),
            ..DeliveryProperties::default()
        },
        ..delivery(tag, content)
    }
}

/// A finite delivery stream.
pub(crate) fn stream_of(deliveries: Vec<Delivery>) -> DeliveryStream {
    stream::iter(deliveries.into_iter().map(Ok::<_, AmqpError>)).boxed()
}

/// A delivery stream fed by the returned sender; it ends when the sender drops.
pub(crate) fn feed() -> (mpsc::UnboundedSender<Delivery>, DeliveryStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|delivery| (Ok(delivery), rx))
    })
    .boxed();
    (tx, stream)
}

/// Records every content it sees and answers with a fixed outcome.
pub(crate) struct RecordingHandler {
    outcome: HandlerOutcome,
    pub(crate) seen: Mutex<Vec<Value>>,
}

impl RecordingHandler {
    pub(crate) fn new(outcome: HandlerOutcome) -> Arc<Self> {
        Arc::new(RecordingHandler {
            outcome,
            seen: Mutex::new(vec![]),
        })
    }

    pub(crate) fn seen(&self) -> Vec<Value> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataHandler for RecordingHandler {
    async fn handle(&self, content: Value) -> HandlerOutcome {
        self.seen.lock().unwrap().push(content);
        self.outcome.clone()
    }
}

pub(crate) struct PanickingHandler;

#[async_trait]
impl DataHandler for PanickingHandler {
    async fn handle(&self, _content: Value) -> HandlerOutcome {
        panic!("handler bug")
    }
}

/// Records every batch; fails when built with `failing`.
pub(crate) struct RecordingBatch {
    fail: bool,
    pub(crate) batches: Mutex<Vec<Vec<Value>>>,
}

impl RecordingBatch {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RecordingBatch {
            fail: false,
            batches: Mutex::new(vec![]),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(RecordingBatch {
            fail: true,
            batches: Mutex::new(vec![]),
        })
    }

    pub(crate) fn batches(&self) -> Vec<Vec<Value>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchHandler for RecordingBatch {
    async fn handle_batch(&self, batch: Vec<Delivery>) -> Result<(), HandlerError> {
        let decoded = batch
            .iter()
            .map(|d| serde_json::from_slice(&d.content).unwrap_or(Value::Null))
            .collect();
        self.batches.lock().unwrap().push(decoded);

        if self.fail {
            return Err(HandlerError::internal("batch rejected"));
        }
        Ok(())
    }
}

pub(crate) struct PanickingBatch;

#[async_trait]
impl BatchHandler for PanickingBatch {
    async fn handle_batch(&self, _batch: Vec<Delivery>) -> Result<(), HandlerError> {
        panic!("batch bug")
    }
}

/// Records the tag of every raw delivery; fails on `fail_on` when set.
pub(crate) struct RecordingDeliveries {
    fail_on: Option<u64>,
    pub(crate) tags: Mutex<Vec<u64>>,
}

impl RecordingDeliveries {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RecordingDeliveries {
            fail_on: None,
            tags: Mutex::new(vec![]),
        })
    }

    pub(crate) fn failing_on(tag: u64) -> Arc<Self> {
        Arc::new(RecordingDeliveries {
            fail_on: Some(tag),
            tags: Mutex::new(vec![]),
        })
    }

    pub(crate) fn tags(&self) -> Vec<u64> {
        self.tags.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryHandler for RecordingDeliveries {
    async fn handle_delivery(&self, delivery: Delivery) -> Result<(), HandlerError> {
        self.tags.lock().unwrap().push(delivery.delivery_tag);

        if self.fail_on == Some(delivery.delivery_tag) {
            return Err(HandlerError::internal("delivery rejected"));
        }
        Ok(())
    }
}
