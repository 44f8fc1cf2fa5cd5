//! Coordinator - ワークフローの進行を駆動する
//!
//! # 責務
//! - ワークフロー定義と job レコードを保持（tokio::sync::Mutex）
//! - 次のステップを dispatcher チェーンへ渡す（ロックの外で）
//! - completions / errors / events / control チャネルを消費して job を進める
//!
//! キャンセルは協調的です。以降のステップは dispatch されませんが、
//! ワーカーで実行中のタスクは中断しません。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};

use crate::domain::errors::{BrokerError, DispatchError};
use crate::domain::execution::{ExecutionType, TaskExecution};
use crate::domain::ids::{InstanceId, JobId, WorkflowId};
use crate::domain::job::{JobRecord, JobStatus};
use crate::domain::workflow::{ControlKind, Workflow};
use crate::ports::{Channel, Clock, IdGenerator, Message, MessageBroker, TaskDispatcher};

use super::progression::Progression;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(WorkflowId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} is still running")]
    JobRunning(JobId),

    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// The job has been failed with this error.
    #[error("job {job_id} failed to dispatch: {source}")]
    Dispatch {
        job_id: JobId,
        #[source]
        source: DispatchError,
    },

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Per-job runtime parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobParams {
    pub instance_id: Option<InstanceId>,
    pub inputs: Map<String, Value>,
    pub execution_type: Option<ExecutionType>,
}

#[derive(Default)]
struct CoordinatorState {
    workflows: HashMap<WorkflowId, Workflow>,
    jobs: HashMap<JobId, JobRecord>,
}

pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    dispatcher: Arc<dyn TaskDispatcher>,
    broker: Arc<dyn MessageBroker>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    /// Woken whenever a job may have changed state.
    changed: Notify,
}

impl Coordinator {
    pub fn new(
        dispatcher: Arc<dyn TaskDispatcher>,
        broker: Arc<dyn MessageBroker>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            dispatcher,
            broker,
            ids,
            clock,
            changed: Notify::new(),
        }
    }

    pub async fn register_workflow(&self, workflow: Workflow) -> Result<WorkflowId, CoordinatorError> {
        if let Some(name) = workflow.invalid_step_name() {
            return Err(CoordinatorError::InvalidWorkflow(format!(
                "step name '{name}' is empty or duplicated"
            )));
        }
        let workflow_id = self.ids.generate_workflow_id();
        self.state.lock().await.workflows.insert(workflow_id, workflow);
        tracing::info!(%workflow_id, "workflow registered");
        Ok(workflow_id)
    }

    /// Creates the job and dispatches its first step.
    ///
    /// An unresolved first step fails the job and is returned here.
    pub async fn start_job(
        &self,
        workflow_id: WorkflowId,
        params: JobParams,
    ) -> Result<JobId, CoordinatorError> {
        let (job_id, dispatches) = {
            let mut state = self.state.lock().await;
            let steps = state
                .workflows
                .get(&workflow_id)
                .ok_or(CoordinatorError::WorkflowNotFound(workflow_id))?
                .tasks
                .clone();

            let job_id = self.ids.generate_job_id();
            let mut job = JobRecord::new(job_id, workflow_id, steps, params.inputs, self.clock.now());
            job.instance_id = params.instance_id;
            job.execution_type = params.execution_type;
            let dispatches = Progression::new(&mut job, self.ids.as_ref(), self.clock.now()).advance();
            state.jobs.insert(job_id, job);
            (job_id, dispatches)
        };
        tracing::info!(%job_id, %workflow_id, "job started");

        let result = self.dispatch_all(job_id, dispatches).await;
        self.changed.notify_waiters();
        result.map(|()| job_id)
    }

    /// Applies one message from the broker.
    pub async fn process(&self, message: Message) -> Result<(), CoordinatorError> {
        let Some(job_id) = job_of(&message) else {
            tracing::debug!(kind = message.kind(), "message without job id ignored");
            return Ok(());
        };

        let dispatches = {
            let mut state = self.state.lock().await;
            let Some(job) = state.jobs.get_mut(&job_id) else {
                tracing::debug!(%job_id, kind = message.kind(), "message for unknown job ignored");
                return Ok(());
            };
            if !job.is_running() {
                tracing::debug!(%job_id, state = ?job.state, kind = message.kind(), "job already settled");
                return Ok(());
            }

            let now = self.clock.now();
            let mut progression = Progression::new(job, self.ids.as_ref(), now);
            let applied = match message {
                Message::Completion(execution) => progression.complete(execution),
                Message::Error(execution) => {
                    let task_id = execution.id();
                    let applied = progression.fail(execution);
                    if applied {
                        tracing::warn!(%job_id, %task_id, "task failed, job failed");
                    }
                    applied
                }
                Message::Progress(event) => {
                    progression.record_progress(&event);
                    return Ok(());
                }
                Message::Task(execution) if ControlKind::of(execution.task.task_type()).is_some() => {
                    progression.interpret(&execution)
                }
                Message::Task(execution) => {
                    tracing::warn!(%job_id, task_type = %execution.task.task_type(), "non-control task on coordinator");
                    false
                }
            };
            if !applied {
                tracing::debug!(%job_id, "stale or duplicate message ignored");
                return Ok(());
            }
            progression.advance()
        };

        let result = self.dispatch_all(job_id, dispatches).await;
        self.changed.notify_waiters();
        result
    }

    /// Stops further dispatch for the job. In-flight tasks keep running.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        let status = {
            let mut state = self.state.lock().await;
            let job = state
                .jobs
                .get_mut(&job_id)
                .ok_or(CoordinatorError::JobNotFound(job_id))?;
            job.mark_cancelled(self.clock.now());
            job.status()
        };
        tracing::info!(%job_id, state = ?status.state, settled = status.settled_tasks, "job cancelled");
        self.changed.notify_waiters();
        Ok(status)
    }

    pub async fn job_status(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .map(JobRecord::status)
            .ok_or(CoordinatorError::JobNotFound(job_id))
    }

    /// Settled executions of the job, in settlement order.
    pub async fn job_executions(&self, job_id: JobId) -> Result<Vec<TaskExecution>, CoordinatorError> {
        let state = self.state.lock().await;
        state
            .jobs
            .get(&job_id)
            .map(|job| job.executions.clone())
            .ok_or(CoordinatorError::JobNotFound(job_id))
    }

    /// Releases a settled job and returns its final status.
    ///
    /// Running jobs are kept; later lookups of a forgotten job report `JobNotFound`.
    pub async fn forget_job(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get(&job_id)
            .ok_or(CoordinatorError::JobNotFound(job_id))?;
        if job.is_running() {
            return Err(CoordinatorError::JobRunning(job_id));
        }
        let status = job.status();
        state.jobs.remove(&job_id);
        tracing::debug!(%job_id, state = ?status.state, "job released");
        Ok(status)
    }

    /// Waits until the job reaches a terminal state.
    pub async fn await_terminal(&self, job_id: JobId) -> Result<JobStatus, CoordinatorError> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            // 状態確認より前に登録しておき、通知の取りこぼしを防ぐ
            changed.as_mut().enable();

            let status = self.job_status(job_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            changed.await;
        }
    }

    /// Consumes coordinator channels until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, poll_interval: Duration) {
        let completions = Channel::completions();
        let errors = Channel::errors();
        let control = Channel::control();
        let events = Channel::events();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                r = self.broker.receive(&completions, poll_interval) => r,
                r = self.broker.receive(&errors, poll_interval) => r,
                r = self.broker.receive(&control, poll_interval) => r,
                r = self.broker.receive(&events, poll_interval) => r,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "coordinator receive failed");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            // 失敗は job の状態に記録済みなので、再配送しても結果は変わらない
            if let Err(e) = self.process(delivery.message().clone()).await {
                tracing::error!(error = %e, "coordinator message processing failed");
            }
            if let Err(e) = delivery.ack().await {
                tracing::warn!(error = %e, "coordinator ack failed");
            }
        }
        tracing::debug!("coordinator loop stopped");
    }

    async fn dispatch_all(
        &self,
        job_id: JobId,
        executions: Vec<TaskExecution>,
    ) -> Result<(), CoordinatorError> {
        for execution in executions {
            let task_id = execution.id();
            let task_type = execution.task.task_type().clone();
            if let Err(source) = self.dispatcher.dispatch(execution).await {
                tracing::error!(%job_id, %task_id, %task_type, error = %source, "dispatch failed, job failed");
                let mut state = self.state.lock().await;
                if let Some(job) = state.jobs.get_mut(&job_id) {
                    Progression::new(job, self.ids.as_ref(), self.clock.now())
                        .fail_dispatch(task_id, &source);
                }
                return Err(CoordinatorError::Dispatch { job_id, source });
            }
            tracing::debug!(%job_id, %task_id, %task_type, "task dispatched");
        }
        Ok(())
    }
}

fn job_of(message: &Message) -> Option<JobId> {
    match message {
        Message::Task(execution) | Message::Completion(execution) | Message::Error(execution) => {
            execution.job_id
        }
        Message::Progress(event) => Some(event.job_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobState, TaskStatus, TaskType};
    use crate::impls::{
        ControlTaskDispatcher, InMemoryMessageBroker, TaskDispatcherChain, WorkerTaskDispatcher,
        WorkerTaskDispatcherResolver,
    };
    use crate::ports::{Delivery, SystemClock, UlidGenerator};
    use chrono::Utc;
    use serde_json::json;

    struct Fixture {
        broker: Arc<InMemoryMessageBroker>,
        coordinator: Coordinator,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryMessageBroker::new());
        let mut chain = TaskDispatcherChain::new();
        chain.register_predicate(
            "control",
            ControlTaskDispatcher::claims,
            Arc::new(ControlTaskDispatcher::new(broker.clone())),
        );
        chain.register(
            "worker",
            WorkerTaskDispatcherResolver::for_types(
                Arc::new(WorkerTaskDispatcher::new(broker.clone())),
                [TaskType::new("echo")],
            ),
        );
        let coordinator = Coordinator::new(
            Arc::new(chain),
            broker.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        );
        Fixture {
            broker,
            coordinator,
        }
    }

    fn workflow(tasks: Value) -> Workflow {
        serde_json::from_value(json!({ "tasks": tasks })).unwrap()
    }

    async fn next(broker: &InMemoryMessageBroker, channel: &Channel) -> Box<dyn Delivery> {
        broker
            .receive(channel, Duration::from_millis(200))
            .await
            .unwrap()
            .expect("a message on the channel")
    }

    fn task_of(delivery: &dyn Delivery) -> TaskExecution {
        match delivery.message() {
            Message::Task(execution) => execution.clone(),
            other => panic!("unexpected message {other:?}"),
        }
    }

    /// ワーカーの代わりに完了を返す
    async fn reply_ok(f: &Fixture, mut execution: TaskExecution, output: Value) {
        execution.start(Utc::now());
        execution.complete(output, Utc::now());
        f.coordinator
            .process(Message::Completion(execution))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn branch_is_routed_to_control_then_interpreted() {
        let f = fixture();
        let workflow_id = f
            .coordinator
            .register_workflow(workflow(json!([
                { "name": "route", "type": "branch", "parameters": {
                    "value": "${kind}",
                    "cases": [{ "key": "a", "tasks": [{ "name": "on_a", "type": "echo" }] }]
                } }
            ])))
            .await
            .unwrap();

        let job_id = f
            .coordinator
            .start_job(
                workflow_id,
                JobParams {
                    inputs: json!({ "kind": "a" }).as_object().cloned().unwrap(),
                    ..JobParams::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(f.broker.counts(&Channel::tasks()).unwrap().pending, 0);
        let control = next(&f.broker, &Channel::control()).await;
        f.coordinator.process(control.message().clone()).await.unwrap();
        control.ack().await.unwrap();

        let worker = next(&f.broker, &Channel::tasks()).await;
        let on_a = task_of(worker.as_ref());
        assert_eq!(on_a.task.task_type().as_str(), "echo");
        worker.ack().await.unwrap();

        reply_ok(&f, on_a, json!("done")).await;
        let status = f.coordinator.await_terminal(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.outputs["on_a"], json!("done"));
    }

    #[tokio::test]
    async fn unresolved_first_step_fails_the_job() {
        let f = fixture();
        let workflow_id = f
            .coordinator
            .register_workflow(workflow(json!([{ "name": "x", "type": "nobody/v1/handles" }])))
            .await
            .unwrap();

        let err = f
            .coordinator
            .start_job(workflow_id, JobParams::default())
            .await
            .unwrap_err();

        let (job_id, source) = match err {
            CoordinatorError::Dispatch { job_id, source } => (job_id, source),
            other => panic!("expected a dispatch error, got {other:?}"),
        };
        assert!(matches!(source, DispatchError::UnresolvedTaskType(_)));
        let status = f.coordinator.job_status(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().message.contains("nobody/v1/handles"));
    }

    #[tokio::test]
    async fn cancelled_job_dispatches_nothing_more() {
        let f = fixture();
        let workflow_id = f
            .coordinator
            .register_workflow(workflow(json!([
                { "name": "a", "type": "echo" },
                { "name": "b", "type": "echo" }
            ])))
            .await
            .unwrap();
        let job_id = f
            .coordinator
            .start_job(workflow_id, JobParams::default())
            .await
            .unwrap();
        let delivery = next(&f.broker, &Channel::tasks()).await;
        let a = task_of(delivery.as_ref());
        delivery.ack().await.unwrap();

        let status = f.coordinator.cancel_job(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert_eq!(status.running_tasks, 0);
        let executions = f.coordinator.job_executions(job_id).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, TaskStatus::Cancelled);

        reply_ok(&f, a, json!(1)).await;
        assert_eq!(f.broker.counts(&Channel::tasks()).unwrap().pending, 0);
        let status = f.coordinator.await_terminal(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);
        assert!(status.outputs.is_empty());
    }

    #[tokio::test]
    async fn unresolved_fork_child_fails_the_job_without_stale_work() {
        let f = fixture();
        let workflow_id = f
            .coordinator
            .register_workflow(workflow(json!([
                { "name": "split", "type": "fork", "parameters": { "branches": [
                    [{ "name": "ok", "type": "echo" }],
                    [{ "name": "bad", "type": "nobody/v1/handles" }]
                ] } }
            ])))
            .await
            .unwrap();
        let job_id = f
            .coordinator
            .start_job(workflow_id, JobParams::default())
            .await
            .unwrap();
        let control = next(&f.broker, &Channel::control()).await;
        let err = f
            .coordinator
            .process(control.message().clone())
            .await
            .unwrap_err();
        control.ack().await.unwrap();
        assert!(matches!(err, CoordinatorError::Dispatch { .. }));

        let status = f.coordinator.job_status(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.running_tasks, 0);

        // the sibling that did reach a worker reports late and is ignored
        let delivery = next(&f.broker, &Channel::tasks()).await;
        let ok = task_of(delivery.as_ref());
        delivery.ack().await.unwrap();
        reply_ok(&f, ok, json!(1)).await;
        let status = f.coordinator.job_status(job_id).await.unwrap();
        assert_eq!(status.running_tasks, 0);
        assert!(!status.outputs.contains_key("split"));
    }

    #[tokio::test]
    async fn forgotten_job_is_no_longer_found() {
        let f = fixture();
        let workflow_id = f
            .coordinator
            .register_workflow(workflow(json!([{ "name": "a", "type": "echo" }])))
            .await
            .unwrap();
        let job_id = f
            .coordinator
            .start_job(workflow_id, JobParams::default())
            .await
            .unwrap();

        let err = f.coordinator.forget_job(job_id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::JobRunning(id) if id == job_id));

        f.coordinator.cancel_job(job_id).await.unwrap();
        let status = f.coordinator.forget_job(job_id).await.unwrap();
        assert_eq!(status.state, JobState::Cancelled);

        assert!(f.coordinator.state.lock().await.jobs.is_empty());
        let err = f.coordinator.job_status(job_id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::JobNotFound(_)));
        let err = f.coordinator.forget_job(job_id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_step_names_are_rejected() {
        let f = fixture();
        let err = f
            .coordinator
            .register_workflow(workflow(json!([
                { "name": "a", "type": "echo" },
                { "name": "a", "type": "echo" }
            ])))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidWorkflow(_)));
    }

    #[tokio::test]
    async fn unknown_workflow_and_job_are_reported() {
        let f = fixture();
        let ids = UlidGenerator::new(SystemClock);

        let err = f
            .coordinator
            .start_job(ids.generate_workflow_id(), JobParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::WorkflowNotFound(_)));

        let err = f.coordinator.job_status(ids.generate_job_id()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn progress_updates_the_running_execution() {
        let f = fixture();
        let workflow_id = f
            .coordinator
            .register_workflow(workflow(json!([{ "name": "a", "type": "echo" }])))
            .await
            .unwrap();
        let job_id = f
            .coordinator
            .start_job(workflow_id, JobParams::default())
            .await
            .unwrap();
        let delivery = next(&f.broker, &Channel::tasks()).await;
        let a = task_of(delivery.as_ref());
        delivery.ack().await.unwrap();

        f.coordinator
            .process(Message::Progress(crate::domain::ProgressEvent {
                job_id,
                task_id: a.id(),
                progress: 60,
                emitted_at: Utc::now(),
            }))
            .await
            .unwrap();

        let state = f.coordinator.state.lock().await;
        assert_eq!(state.jobs[&job_id].in_flight[&a.id()].execution.progress, 60);
    }
}
