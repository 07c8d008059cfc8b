// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod otel;
mod publisher;

#[cfg(test)]
mod testing;

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod fault;
pub mod handler;
pub mod queue;
pub mod response;
pub mod rpc;
pub mod topology;
pub mod transport;
