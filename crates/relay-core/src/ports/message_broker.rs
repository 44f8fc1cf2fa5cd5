//! MessageBroker port - 名前付きチャネルによる非同期配送
//!
//! - at-least-once: 未決着の delivery は再配送される
//! - competing consumers: 1 メッセージは同時に 1 consumer だけに渡る
//! - FIFO はチャネル単位のみ保証（チャネル間の順序保証なし）

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::BrokerError;
use crate::domain::events::ProgressEvent;
use crate::domain::execution::TaskExecution;

/// Channel key in the form `"<exchange>/<routing>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub const TASKS: &'static str = "tasks";
    pub const CONTROL: &'static str = "control";
    pub const COMPLETIONS: &'static str = "completions";
    pub const ERRORS: &'static str = "errors";
    pub const EVENTS: &'static str = "events";

    pub fn new(exchange: &str, routing: &str) -> Self {
        Self(format!("{exchange}/{routing}"))
    }

    /// Topic routed to itself, e.g. `control/control`.
    pub fn of(topic: &str) -> Self {
        Self::new(topic, topic)
    }

    /// Ordinary tasks, consumed by the worker pool.
    pub fn tasks() -> Self {
        Self::of(Self::TASKS)
    }

    /// Control-flow tasks, interpreted by the coordinator.
    pub fn control() -> Self {
        Self::of(Self::CONTROL)
    }

    pub fn completions() -> Self {
        Self::of(Self::COMPLETIONS)
    }

    pub fn errors() -> Self {
        Self::of(Self::ERRORS)
    }

    pub fn events() -> Self {
        Self::of(Self::EVENTS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload carried on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Task(TaskExecution),
    Completion(TaskExecution),
    Error(TaskExecution),
    Progress(ProgressEvent),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Task(_) => "task",
            Message::Completion(_) => "completion",
            Message::Error(_) => "error",
            Message::Progress(_) => "progress",
        }
    }
}

/// MessageBroker はチャネル単位のキュー
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Makes `message` eligible for delivery. Does not wait for a consumer.
    async fn send(&self, channel: &Channel, message: Message) -> Result<(), BrokerError>;

    /// Waits up to `timeout` for the next message on `channel`.
    ///
    /// `Ok(None)` means nothing arrived in time.
    async fn receive(
        &self,
        channel: &Channel,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, BrokerError>;
}

/// One handed-out message.
///
/// Dropping a delivery without `ack`/`nack` puts it back on its channel.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &Message;

    /// 1 on first delivery, incremented on every redelivery.
    fn delivery_count(&self) -> u32;

    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Returns the message to the head of its channel.
    async fn nack(self: Box<Self>) -> Result<(), BrokerError>;
}
