use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::execution::ExecutionFailure;
use crate::ports::{Channel, Clock, Message, MessageBroker};

use super::executor::TaskExecutor;

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が新しい delivery を取らなくなる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers consuming `tasks/tasks`.
    pub fn spawn(
        n: usize,
        broker: Arc<dyn MessageBroker>,
        executor: Arc<TaskExecutor>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                broker: Arc::clone(&broker),
                executor: Arc::clone(&executor),
                clock: Arc::clone(&clock),
                poll_interval,
            };
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker.run(&mut rx).await;
            });
            joins.push(join);
        }
        tracing::info!(workers = n, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// This does not forcibly cancel in-flight handler execution; it just stops
    /// taking new deliveries.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::warn!(error = %e, "worker task ended abnormally");
            }
        }
    }
}

struct Worker {
    id: usize,
    broker: Arc<dyn MessageBroker>,
    executor: Arc<TaskExecutor>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        let tasks = Channel::tasks();
        loop {
            // shutdown が来ていたら抜ける
            if *shutdown_rx.borrow() {
                break;
            }

            // receive は「待つ」可能性があるので select で shutdown と競合させる
            let received = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.broker.receive(&tasks, self.poll_interval) => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "receive failed");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            let Message::Task(mut execution) = delivery.message().clone() else {
                tracing::warn!(worker = self.id, kind = delivery.message().kind(), "unexpected message on task channel");
                if let Err(e) = delivery.ack().await {
                    tracing::warn!(worker = self.id, error = %e, "ack failed");
                }
                continue;
            };
            if delivery.delivery_count() > 1 {
                tracing::debug!(worker = self.id, task_id = %execution.id(), count = delivery.delivery_count(), "redelivered task");
            }

            // ここから先は handler 実行（await がある）
            execution.start(self.clock.now());
            let (channel, reply) = match self.executor.handle(&execution).await {
                Ok(output) => {
                    execution.complete(output, self.clock.now());
                    (Channel::completions(), Message::Completion(execution))
                }
                Err(err) => {
                    execution.fail(ExecutionFailure::from(&err), self.clock.now());
                    (Channel::errors(), Message::Error(execution))
                }
            };

            // 結果を返せなかったら nack して再配送させる
            match self.broker.send(&channel, reply).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack().await {
                        tracing::warn!(worker = self.id, error = %e, "ack failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "result not reported, task will be redelivered");
                    if let Err(e) = delivery.nack().await {
                        tracing::warn!(worker = self.id, error = %e, "nack failed");
                    }
                }
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }
}
