//! Impls - ports の実装（開発用・単一ノード用）
//!
//! # 含まれる実装
//! - **InMemoryMessageBroker**: プロセス内の at-least-once ブローカー
//! - **TaskDispatcherChain** と Control / Worker dispatcher
//! - **InMemoryDataStorage**: key/value ストア
//! - **InMemoryFileStorage** / **LocalFileStorage**: blob ストア
//! - **BrokerEventSink** / **NoopEventSink**: 進捗イベントの送信先
//!
//! 分散環境向けのブローカーやストアは、同じ ports を実装した別クレートに置きます。

pub mod dispatch;
pub mod event_sink;
pub mod inmem_broker;
pub mod local_file;
pub mod memory_data;
pub mod memory_file;

// 主要な型を再エクスポート
pub use self::dispatch::{
    ControlTaskDispatcher, TaskDispatcherChain, WorkerTaskDispatcher,
    WorkerTaskDispatcherResolver,
};
pub use self::event_sink::{BrokerEventSink, NoopEventSink};
pub use self::inmem_broker::InMemoryMessageBroker;
pub use self::local_file::LocalFileStorage;
pub use self::memory_data::InMemoryDataStorage;
pub use self::memory_file::InMemoryFileStorage;
