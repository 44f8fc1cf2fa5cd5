//! EventSink 実装
//!
//! - **BrokerEventSink**: 進捗を `events/events` チャネルへ送る
//! - **NoopEventSink**: 何もしない

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::EventSinkError;
use crate::domain::events::ProgressEvent;
use crate::ports::{Channel, EventSink, Message, MessageBroker};

pub struct BrokerEventSink {
    broker: Arc<dyn MessageBroker>,
    channel: Channel,
}

impl BrokerEventSink {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            channel: Channel::events(),
        }
    }
}

#[async_trait]
impl EventSink for BrokerEventSink {
    async fn publish(&self, event: ProgressEvent) -> Result<(), EventSinkError> {
        self.broker
            .send(&self.channel, Message::Progress(event))
            .await
            .map_err(|e| EventSinkError::Publish(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn publish(&self, _event: ProgressEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}
