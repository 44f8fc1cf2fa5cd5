//! InMemoryMessageBroker - 単一ノード用のメッセージブローカー
//!
//! # 実装詳細
//! - HashMap<Channel, ChannelQueue> でチャネルごとにキューを管理
//! - std::sync::Mutex で排他制御（Delivery の Drop からも再投入できるように）
//! - チャネルごとの tokio::sync::Notify で send 時に待機中の receive を起こす
//! - ロックを保持したまま await しない

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::errors::BrokerError;
use crate::observability::ChannelCounts;
use crate::ports::{Channel, Delivery, Message, MessageBroker};

#[derive(Debug, Clone)]
struct Envelope {
    tag: u64,
    message: Message,
    delivery_count: u32,
}

#[derive(Default)]
struct ChannelQueue {
    pending: VecDeque<Envelope>,
    in_flight: HashMap<u64, Envelope>,
    notify: Arc<Notify>,
    delivered: usize,
    redelivered: usize,
}

impl ChannelQueue {
    fn counts(&self) -> ChannelCounts {
        ChannelCounts {
            pending: self.pending.len(),
            in_flight: self.in_flight.len(),
            delivered: self.delivered,
            redelivered: self.redelivered,
        }
    }

    /// in_flight から pending の先頭へ戻す
    fn requeue(&mut self, tag: u64) -> bool {
        match self.in_flight.remove(&tag) {
            Some(envelope) => {
                self.pending.push_front(envelope);
                self.redelivered += 1;
                self.notify.notify_one();
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    channels: HashMap<Channel, ChannelQueue>,
    next_tag: u64,
}

type SharedState = Arc<Mutex<BrokerState>>;

enum Take {
    Ready(InMemoryDelivery),
    Wait(Arc<Notify>),
}

fn lock(state: &Mutex<BrokerState>) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
    state
        .lock()
        .map_err(|_| BrokerError::OperationFailed("broker state lock poisoned".to_string()))
}

/// InMemoryMessageBroker はプロセス内の at-least-once ブローカー
///
/// # 使用例
/// ```ignore
/// let broker = InMemoryMessageBroker::new();
/// broker.send(&Channel::tasks(), Message::Task(execution)).await?;
/// let delivery = broker.receive(&Channel::tasks(), Duration::from_secs(1)).await?;
/// ```
#[derive(Clone, Default)]
pub struct InMemoryMessageBroker {
    state: SharedState,
}

impl InMemoryMessageBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self, channel: &Channel) -> Result<ChannelCounts, BrokerError> {
        let state = lock(&self.state)?;
        Ok(state
            .channels
            .get(channel)
            .map(ChannelQueue::counts)
            .unwrap_or_default())
    }

    /// pending から 1 件取り出す。なければ待機用の Notify を返す
    fn try_take(&self, channel: &Channel) -> Result<Take, BrokerError> {
        let mut state = lock(&self.state)?;
        let queue = state.channels.entry(channel.clone()).or_default();
        let Some(mut envelope) = queue.pending.pop_front() else {
            return Ok(Take::Wait(Arc::clone(&queue.notify)));
        };

        envelope.delivery_count += 1;
        queue.in_flight.insert(envelope.tag, envelope.clone());
        // 残りがあれば次の consumer を起こす
        if !queue.pending.is_empty() {
            queue.notify.notify_one();
        }

        Ok(Take::Ready(InMemoryDelivery {
            channel: channel.clone(),
            tag: envelope.tag,
            message: envelope.message,
            delivery_count: envelope.delivery_count,
            state: Arc::clone(&self.state),
            settled: false,
        }))
    }
}

#[async_trait]
impl MessageBroker for InMemoryMessageBroker {
    async fn send(&self, channel: &Channel, message: Message) -> Result<(), BrokerError> {
        let mut state = lock(&self.state)?;
        state.next_tag += 1;
        let tag = state.next_tag;
        let queue = state.channels.entry(channel.clone()).or_default();
        queue.pending.push_back(Envelope {
            tag,
            message,
            delivery_count: 0,
        });
        queue.notify.notify_one();
        tracing::trace!(%channel, tag, "message queued");
        Ok(())
    }

    async fn receive(
        &self,
        channel: &Channel,
        timeout: Duration,
    ) -> Result<Option<Box<dyn Delivery>>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notify = match self.try_take(channel)? {
                Take::Ready(delivery) => return Ok(Some(Box::new(delivery))),
                Take::Wait(notify) => notify,
            };
            // notify_one は permit を残すので、ロック解放後の send も取りこぼさない
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }
}

struct InMemoryDelivery {
    channel: Channel,
    tag: u64,
    message: Message,
    delivery_count: u32,
    state: SharedState,
    settled: bool,
}

impl InMemoryDelivery {
    fn settle(&mut self, requeue: bool) -> Result<(), BrokerError> {
        self.settled = true;
        let mut state = lock(&self.state)?;
        let queue = state.channels.entry(self.channel.clone()).or_default();
        let known = if requeue {
            queue.requeue(self.tag)
        } else {
            let removed = queue.in_flight.remove(&self.tag).is_some();
            if removed {
                queue.delivered += 1;
            }
            removed
        };
        if known {
            Ok(())
        } else {
            Err(BrokerError::UnknownDelivery {
                channel: self.channel.to_string(),
                tag: self.tag,
            })
        }
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut delivery = self;
        delivery.settle(false)
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut delivery = self;
        delivery.settle(true)
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self.settle(true) {
            tracing::warn!(channel = %self.channel, tag = self.tag, error = %e, "unsettled delivery could not be requeued");
        } else {
            tracing::debug!(channel = %self.channel, tag = self.tag, "unsettled delivery requeued");
        }
    }
}
