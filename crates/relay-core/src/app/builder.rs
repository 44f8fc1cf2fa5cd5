//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 依存はすべて明示的に組み立てる（グローバルな lookup はしない）

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::context::ContextFactory;
use crate::domain::errors::RegistryError;
use crate::domain::ids::{JobId, WorkflowId};
use crate::domain::task::TaskType;
use crate::handlers;
use crate::impls::{
    BrokerEventSink, ControlTaskDispatcher, InMemoryDataStorage, InMemoryFileStorage,
    InMemoryMessageBroker, LocalFileStorage, TaskDispatcherChain, WorkerTaskDispatcher,
    WorkerTaskDispatcherResolver,
};
use crate::ports::{Clock, DataStorage, FileStorage, MessageBroker, SystemClock, UlidGenerator};

use super::coordinator::{Coordinator, CoordinatorError, JobParams};
use super::executor::TaskExecutor;
use super::registry::{TaskHandler, TaskHandlerRegistry};
use super::worker::WorkerGroup;

/// EngineBuilder はエンジンを構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new()
///     .with_builtin_handlers()?
///     .register("report/v1/render", RenderHandler)?
///     .expect_tasks(&["report/v1/render", "jsonConverter"])
///     .build()?;
/// let handle = engine.start();
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct EngineBuilder {
    registry: TaskHandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    config: EngineConfig,
    broker: Option<Arc<dyn MessageBroker>>,
    data_storage: Option<Arc<dyn DataStorage>>,
    file_storage: Option<Arc<dyn FileStorage>>,
    clock: Arc<dyn Clock>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskHandlerRegistry::new(),
            expected_tasks: None,
            config: EngineConfig::default(),
            broker: None,
            data_storage: None,
            file_storage: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Handler を登録
    pub fn register(
        mut self,
        task_type: impl Into<TaskType>,
        handler: impl TaskHandler + 'static,
    ) -> Result<Self, RegistryError> {
        self.registry.register(task_type.into(), Arc::new(handler))?;
        Ok(self)
    }

    /// jsonConverter / logger / files / dataStorage を登録
    pub fn with_builtin_handlers(mut self) -> Result<Self, RegistryError> {
        handlers::register_builtin(&mut self.registry)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_data_storage(mut self, storage: Arc<dyn DataStorage>) -> Self {
        self.data_storage = Some(storage);
        self
    }

    /// Overrides the storage chosen from `storage_root`.
    pub fn with_file_storage(mut self, storage: Arc<dyn FileStorage>) -> Self {
        self.file_storage = Some(storage);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているかチェック
    /// - 不足があれば BuildError::MissingTaskTypes を返す
    pub fn build(self) -> Result<Engine, BuildError> {
        let registered_types = self.registry.registered_types();
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.iter().any(|t| t.as_str() == x.as_str()))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let config = self.config;
        let clock = self.clock;
        let broker: Arc<dyn MessageBroker> = match self.broker {
            Some(broker) => broker,
            None => Arc::new(InMemoryMessageBroker::new()),
        };
        let data_storage: Arc<dyn DataStorage> = match self.data_storage {
            Some(storage) => storage,
            None => Arc::new(InMemoryDataStorage::new()),
        };
        let file_storage: Arc<dyn FileStorage> = match (self.file_storage, &config.storage_root) {
            (Some(storage), _) => storage,
            (None, Some(root)) => Arc::new(LocalFileStorage::new(root.clone())),
            (None, None) => Arc::new(InMemoryFileStorage::new()),
        };

        // control を先に評価し、残りは登録済み handler の型だけワーカーへ
        let mut chain = TaskDispatcherChain::new();
        chain.register_predicate(
            "control",
            ControlTaskDispatcher::claims,
            Arc::new(ControlTaskDispatcher::new(Arc::clone(&broker))),
        );
        chain.register(
            "worker",
            WorkerTaskDispatcherResolver::for_types(
                Arc::new(WorkerTaskDispatcher::new(Arc::clone(&broker))),
                registered_types.iter().cloned(),
            ),
        );

        let contexts = ContextFactory::new(
            data_storage,
            Arc::new(BrokerEventSink::new(Arc::clone(&broker))),
            file_storage,
            Arc::clone(&clock),
            config.file_directory.clone(),
        );
        let executor = Arc::new(TaskExecutor::new(Arc::new(self.registry), contexts));
        let coordinator = Arc::new(Coordinator::new(
            Arc::new(chain),
            Arc::clone(&broker),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            Arc::clone(&clock),
        ));

        tracing::info!(
            handlers = registered_types.len(),
            workers = config.worker_count,
            "engine built"
        );
        Ok(Engine {
            config,
            broker,
            executor,
            coordinator,
            clock,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine は組み立て済みのランタイム
pub struct Engine {
    config: EngineConfig,
    broker: Arc<dyn MessageBroker>,
    executor: Arc<TaskExecutor>,
    coordinator: Arc<Coordinator>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Starts a job; a job without an execution type gets the configured one.
    pub async fn start_job(
        &self,
        workflow_id: WorkflowId,
        mut params: JobParams,
    ) -> Result<JobId, CoordinatorError> {
        if params.execution_type.is_none() {
            params.execution_type = self.config.execution_type;
        }
        self.coordinator.start_job(workflow_id, params).await
    }

    /// Spawns the worker group and the coordinator loop.
    pub fn start(&self) -> EngineHandle {
        let poll_interval = self.config.poll_interval();
        let workers = WorkerGroup::spawn(
            self.config.worker_count,
            Arc::clone(&self.broker),
            Arc::clone(&self.executor),
            Arc::clone(&self.clock),
            poll_interval,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let coordinator = Arc::clone(&self.coordinator);
        let coordinator_loop = tokio::spawn(async move {
            coordinator.run(shutdown_rx, poll_interval).await;
        });

        EngineHandle {
            workers,
            coordinator_loop,
            shutdown_tx,
        }
    }
}

/// Running engine. Dropping it leaves the loops running; call `shutdown`.
pub struct EngineHandle {
    workers: WorkerGroup,
    coordinator_loop: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl EngineHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        self.workers.shutdown_and_join().await;
        if let Err(e) = self.coordinator_loop.await {
            tracing::warn!(error = %e, "coordinator loop ended abnormally");
        }
        tracing::info!("engine stopped");
    }
}
