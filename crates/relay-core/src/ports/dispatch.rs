//! Dispatch ports - Task から「どう実行するか」への解決
//!
//! - **TaskDispatcher**: 実行方法（control チャネル / worker チャネル など）
//! - **TaskDispatcherResolver**: Task を claim するか decline するかの判定

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::DispatchError;
use crate::domain::execution::TaskExecution;
use crate::domain::task::Task;

/// Hands a task off to its destination.
///
/// Fire-and-forget: returns once the hand-off is done. Completion or failure
/// is reported later on a separate channel.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, execution: TaskExecution) -> Result<(), DispatchError>;
}

/// Claims a task (`Some(dispatcher)`) or declines it (`None`).
pub trait TaskDispatcherResolver: Send + Sync {
    fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskDispatcher>>;
}
