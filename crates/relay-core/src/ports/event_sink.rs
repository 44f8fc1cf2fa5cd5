//! EventSink port - 進捗イベントの送信先

use async_trait::async_trait;

use crate::domain::errors::EventSinkError;
use crate::domain::events::ProgressEvent;

/// EventSink は進捗イベントを coordinator 側へ届ける
///
/// - BrokerEventSink: `events/events` チャネルへ送信
/// - NoopEventSink: 何もしない
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ProgressEvent) -> Result<(), EventSinkError>;
}
