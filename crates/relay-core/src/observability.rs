//! Observability - ブローカーの状態ビュー

use serde::{Deserialize, Serialize};

/// Per-channel counters of the in-memory broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounts {
    /// Waiting for a consumer.
    pub pending: usize,
    /// Handed out, not yet acked or nacked.
    pub in_flight: usize,
    /// Acked.
    pub delivered: usize,
    /// Nacked or dropped unsettled, then put back.
    pub redelivered: usize,
}
