//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TaskHandlerRegistry**: task_type → handler
//! - **TaskExecutor**: handler 呼び出しと ExecutionContext の生成
//! - **WorkerGroup**: tasks チャネルの消費ループ
//! - **Coordinator**: ワークフローの進行（branch / each / fork を含む）
//! - **EngineBuilder**: エンジンの構築とワイヤリング

pub mod builder;
pub mod coordinator;
pub mod executor;
mod progression;
pub mod registry;
pub mod worker;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Engine, EngineBuilder, EngineHandle};
pub use self::coordinator::{Coordinator, CoordinatorError, JobParams};
pub use self::executor::TaskExecutor;
pub use self::registry::{TaskHandler, TaskHandlerRegistry};
pub use self::worker::WorkerGroup;
