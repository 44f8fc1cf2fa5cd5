//! relay-core
//!
//! Task dispatch and execution-context engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, execution, scope, workflow, job, errors, events）
//! - **ports**: 抽象化レイヤー（MessageBroker, TaskDispatcher, DataStorage, FileStorage, EventSink, Clock, IdGenerator）
//! - **impls**: 実装（InMemoryMessageBroker, dispatcher chain, in-memory / local storage）
//! - **context**: handler に渡す ExecutionContext（Data / Event / File）
//! - **handlers**: 組み込み handler（jsonConverter, logger, files, dataStorage）
//! - **app**: アプリケーションロジック（registry, executor, worker, coordinator, builder）
//! - **config**: EngineConfig
//! - **observability**: チャネルの状態ビュー

pub mod app;
pub mod config;
pub mod context;
pub mod domain;
pub mod handlers;
pub mod impls;
pub mod observability;
pub mod ports;
