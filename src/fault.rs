// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Fatal Faults
//!
//! A failure escaping the message controller (a panicking handler, a failed
//! ack or reply) leaves the consumer in an unknown state. The consumer stops
//! and hands a `FatalFault` to the channel's `FaultPolicy`; the host decides
//! what happens next.

use async_trait::async_trait;
use std::{process, time::Duration};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::error;

/// Delay before `ExitProcess` terminates, leaving time to flush logs
pub const DEFAULT_FAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fatal error on queue `{queue}`: {reason}")]
pub struct FatalFault {
    pub queue: String,
    pub reason: String,
}

impl FatalFault {
    pub fn new<R: ToString>(queue: &str, reason: R) -> Self {
        FatalFault {
            queue: queue.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Decides how the host reacts to a fatal fault.
#[async_trait]
pub trait FaultPolicy: Send + Sync {
    async fn on_fatal(&self, fault: FatalFault);
}

/// Logs the fault, waits a grace period, then exits the process with status 1.
#[derive(Debug, Clone)]
pub struct ExitProcess {
    grace: Duration,
}

impl ExitProcess {
    pub fn new(grace: Duration) -> Self {
        ExitProcess { grace }
    }
}

impl Default for ExitProcess {
    fn default() -> Self {
        ExitProcess::new(DEFAULT_FAULT_GRACE_PERIOD)
    }
}

#[async_trait]
impl FaultPolicy for ExitProcess {
    async fn on_fatal(&self, fault: FatalFault) {
        error!(
            queue = %fault.queue,
            reason = %fault.reason,
            "fatal error, terminating process"
        );
        tokio::time::sleep(self.grace).await;
        process::exit(1);
    }
}

/// Forwards faults to the host over a channel.
#[derive(Debug, Clone)]
pub struct FaultSignal {
    tx: UnboundedSender<FatalFault>,
}

impl FaultSignal {
    pub fn channel() -> (FaultSignal, UnboundedReceiver<FatalFault>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FaultSignal { tx }, rx)
    }
}

#[async_trait]
impl FaultPolicy for FaultSignal {
    async fn on_fatal(&self, fault: FatalFault) {
        error!(queue = %fault.queue, reason = %fault.reason, "fatal error");

        if self.tx.send(fault).is_err() {
            error!("fault receiver dropped");
        }
    }
}
