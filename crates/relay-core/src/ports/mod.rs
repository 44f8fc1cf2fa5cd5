//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（メッセージブローカー、key/value ストア、
//! blob storage など）へのインターフェースを提供し、実装の詳細を隠蔽します。
//! 実装は `impls` にあり、すべて明示的に組み立てて渡します。

pub mod clock;
pub mod data_storage;
pub mod dispatch;
pub mod event_sink;
pub mod file_storage;
pub mod id_generator;
pub mod message_broker;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::data_storage::{DataKey, DataStorage};
pub use self::dispatch::{TaskDispatcher, TaskDispatcherResolver};
pub use self::event_sink::EventSink;
pub use self::file_storage::{FileReader, FileStorage};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_broker::{Channel, Delivery, Message, MessageBroker};
