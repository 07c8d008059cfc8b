// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! User code plugs into the engine through `DataHandler`, which receives the
//! decoded JSON content of a delivery and reports a `HandlerOutcome`, and
//! `BatchHandler`, which receives raw deliveries in fixed-size batches.

use crate::transport::Delivery;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A business-rule rejection raised by a handler.
///
/// It is expected, is not logged as an application error, and its code
/// becomes the HTTP-like status of the RPC reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RpcError {
    pub message: String,
    pub code: u16,
}

impl RpcError {
    pub fn new(message: &str, code: u16) -> Self {
        RpcError {
            message: message.to_owned(),
            code,
        }
    }
}

/// An error reported by a handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn internal<M: ToString>(message: M) -> Self {
        HandlerError::Internal(message.to_string())
    }

    pub fn is_rpc(&self) -> bool {
        matches!(self, HandlerError::Rpc(_))
    }

    /// The code carried to the reply: the RPC status, or 0 for anything else.
    pub fn code(&self) -> u16 {
        match self {
            HandlerError::Rpc(err) => err.code,
            HandlerError::Internal(_) => 0,
        }
    }
}

/// What a handler produced for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub result: Value,
    pub error: Option<HandlerError>,
    /// Explicit status, used by the RPC client when building an `RpcResponse`
    pub code: Option<u16>,
}

impl HandlerOutcome {
    pub fn ok(result: Value) -> Self {
        HandlerOutcome {
            result,
            error: None,
            code: None,
        }
    }

    pub fn failed(result: Value, error: HandlerError) -> Self {
        HandlerOutcome {
            result,
            error: Some(error),
            code: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

/// Handles the decoded content of a single delivery.
#[async_trait]
pub trait DataHandler: Send + Sync {
    async fn handle(&self, content: Value) -> HandlerOutcome;
}

/// Handles a full batch of raw deliveries.
///
/// The deliveries are already acknowledged when the batch is handed over.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, batch: Vec<Delivery>) -> Result<(), HandlerError>;
}

/// Receives raw deliveries, bypassing validation and decoding.
///
/// Nothing is acknowledged on the handler's behalf: it settles each delivery
/// itself, usually through `MessageChannel::ack`. An error stops the consumer.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle_delivery(&self, delivery: Delivery) -> Result<(), HandlerError>;
}
