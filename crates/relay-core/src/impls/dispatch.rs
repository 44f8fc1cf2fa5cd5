//! Dispatch 実装 - resolver の順序付きチェーン
//!
//! # 構成
//! - **TaskDispatcherChain**: (resolver, dispatcher) の戦略テーブル。登録順に問い合わせ、最初に claim したものが勝つ
//! - **ControlTaskDispatcher**: branch / each / fork を `control/control` へ送る
//! - **WorkerTaskDispatcher**: 通常タスクを `tasks/tasks` へ送る
//!
//! control 系の resolver は必ず fallback の worker resolver より先に登録します。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::DispatchError;
use crate::domain::execution::TaskExecution;
use crate::domain::task::{Task, TaskType};
use crate::domain::workflow::ControlKind;
use crate::ports::{Channel, Message, MessageBroker, TaskDispatcher, TaskDispatcherResolver};

/// Sends control-flow tasks to the coordinator's control channel.
pub struct ControlTaskDispatcher {
    broker: Arc<dyn MessageBroker>,
    channel: Channel,
}

impl ControlTaskDispatcher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            channel: Channel::control(),
        }
    }

    pub fn claims(task: &Task) -> bool {
        ControlKind::of(task.task_type()).is_some()
    }
}

#[async_trait]
impl TaskDispatcher for ControlTaskDispatcher {
    async fn dispatch(&self, execution: TaskExecution) -> Result<(), DispatchError> {
        self.broker
            .send(&self.channel, Message::Task(execution))
            .await?;
        Ok(())
    }
}

/// Sends ordinary tasks to the worker pool.
pub struct WorkerTaskDispatcher {
    broker: Arc<dyn MessageBroker>,
    channel: Channel,
}

impl WorkerTaskDispatcher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            channel: Channel::tasks(),
        }
    }
}

#[async_trait]
impl TaskDispatcher for WorkerTaskDispatcher {
    async fn dispatch(&self, execution: TaskExecution) -> Result<(), DispatchError> {
        self.broker
            .send(&self.channel, Message::Task(execution))
            .await?;
        Ok(())
    }
}

/// Which task types the worker resolver claims.
#[derive(Debug, Clone)]
enum Claim {
    All,
    Types(HashSet<TaskType>),
}

/// Fallback resolver for worker-executed tasks.
pub struct WorkerTaskDispatcherResolver {
    dispatcher: Arc<dyn TaskDispatcher>,
    claim: Claim,
}

impl WorkerTaskDispatcherResolver {
    /// Claims only the given task types.
    pub fn for_types(
        dispatcher: Arc<dyn TaskDispatcher>,
        task_types: impl IntoIterator<Item = TaskType>,
    ) -> Self {
        Self {
            dispatcher,
            claim: Claim::Types(task_types.into_iter().collect()),
        }
    }

    /// Claims every task.
    pub fn claim_all(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            dispatcher,
            claim: Claim::All,
        }
    }
}

impl TaskDispatcherResolver for WorkerTaskDispatcherResolver {
    fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskDispatcher>> {
        let claimed = match &self.claim {
            Claim::All => true,
            Claim::Types(types) => types.contains(task.task_type()),
        };
        claimed.then(|| Arc::clone(&self.dispatcher))
    }
}

type Predicate = Box<dyn Fn(&Task) -> bool + Send + Sync>;

/// A `(predicate, dispatcher)` pair.
struct PredicateResolver {
    predicate: Predicate,
    dispatcher: Arc<dyn TaskDispatcher>,
}

impl TaskDispatcherResolver for PredicateResolver {
    fn resolve(&self, task: &Task) -> Option<Arc<dyn TaskDispatcher>> {
        (self.predicate)(task).then(|| Arc::clone(&self.dispatcher))
    }
}

struct ChainEntry {
    name: String,
    resolver: Box<dyn TaskDispatcherResolver>,
}

/// TaskDispatcherChain は登録順に resolver を評価する
///
/// # 使用例
/// ```ignore
/// let mut chain = TaskDispatcherChain::new();
/// chain.register_predicate("control", ControlTaskDispatcher::claims, control);
/// chain.register("worker", WorkerTaskDispatcherResolver::claim_all(worker));
/// chain.dispatch(execution).await?;
/// ```
#[derive(Default)]
pub struct TaskDispatcherChain {
    entries: Vec<ChainEntry>,
}

impl TaskDispatcherChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        resolver: impl TaskDispatcherResolver + 'static,
    ) -> &mut Self {
        self.entries.push(ChainEntry {
            name: name.into(),
            resolver: Box::new(resolver),
        });
        self
    }

    pub fn register_predicate<P>(
        &mut self,
        name: impl Into<String>,
        predicate: P,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> &mut Self
    where
        P: Fn(&Task) -> bool + Send + Sync + 'static,
    {
        self.register(
            name,
            PredicateResolver {
                predicate: Box::new(predicate),
                dispatcher,
            },
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First resolver to claim `task` wins.
    pub fn resolve(&self, task: &Task) -> Result<Arc<dyn TaskDispatcher>, DispatchError> {
        self.entries
            .iter()
            .find_map(|entry| {
                entry.resolver.resolve(task).inspect(|_| {
                    tracing::debug!(
                        task_type = %task.task_type(),
                        task_id = %task.id(),
                        resolver = %entry.name,
                        "task resolved"
                    );
                })
            })
            .ok_or_else(|| DispatchError::UnresolvedTaskType(task.task_type().clone()))
    }
}

#[async_trait]
impl TaskDispatcher for TaskDispatcherChain {
    async fn dispatch(&self, execution: TaskExecution) -> Result<(), DispatchError> {
        let dispatcher = self.resolve(&execution.task)?;
        dispatcher.dispatch(execution).await
    }
}
