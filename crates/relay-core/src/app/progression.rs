//! Job progression - ブランチライン上のステップ進行
//!
//! coordinator のロック内で呼ばれる同期ロジックです。I/O は行わず、
//! 新しく dispatch すべき `TaskExecution` を返すだけです。
//!
//! - ライン 0 がルート。`each` / `fork` は子ラインを開き、全子ラインの完了で join します
//! - `branch` は一致したケースのタスクを残りステップの先頭に差し込みます
//! - ステップのパラメータ中の `"${name}"` / `"${name.path}"` は
//!   ラインのローカル値 → ステップ出力 → job 入力 の順で解決します

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::errors::{DispatchError, TaskExecutionError};
use crate::domain::execution::{ExecutionFailure, TaskExecution};
use crate::domain::events::ProgressEvent;
use crate::domain::ids::TaskId;
use crate::domain::job::{InFlight, JobRecord, Join, Line, ParentSlot};
use crate::domain::task::Task;
use crate::domain::workflow::{BranchCase, ControlKind, WorkflowTask};
use crate::ports::IdGenerator;

const DEFAULT_ITEM_VAR: &str = "item";
const ITEM_INDEX_VAR: &str = "itemIndex";

/// What a control step turns into.
enum ControlPlan {
    /// Tasks to run next on the same line.
    Splice(Vec<WorkflowTask>),
    /// One child line per entry: its steps and extra locals.
    Fan(Vec<(Vec<WorkflowTask>, Map<String, Value>)>),
}

pub(crate) struct Progression<'a> {
    job: &'a mut JobRecord,
    ids: &'a dyn IdGenerator,
    now: DateTime<Utc>,
}

impl<'a> Progression<'a> {
    pub fn new(job: &'a mut JobRecord, ids: &'a dyn IdGenerator, now: DateTime<Utc>) -> Self {
        Self { job, ids, now }
    }

    /// Starts the next step on every idle line and returns the executions to dispatch.
    ///
    /// Completes the job once the root line runs out of steps.
    pub fn advance(&mut self) -> Vec<TaskExecution> {
        let mut dispatches = Vec::new();
        let mut ready: Vec<usize> = (0..self.job.lines.len()).rev().collect();

        while let Some(idx) = ready.pop() {
            if !self.job.is_running() {
                break;
            }
            if !self.job.lines[idx].is_idle() {
                continue;
            }
            match self.job.lines[idx].steps.pop_front() {
                Some(step) => dispatches.push(self.begin_step(idx, step)),
                None => {
                    self.job.lines[idx].done = true;
                    match self.job.lines[idx].parent {
                        Some(parent) => {
                            if self.join_child(parent, idx) {
                                ready.push(parent.line);
                            }
                        }
                        None => self.job.mark_completed(self.now),
                    }
                }
            }
        }
        dispatches
    }

    /// Worker reported success. `false` if the task is unknown or already settled.
    pub fn complete(&mut self, execution: TaskExecution) -> bool {
        let Some(in_flight) = self.job.in_flight.remove(&execution.id()) else {
            return false;
        };
        let output = execution.output.clone().unwrap_or(Value::Null);
        self.settle(in_flight.line, in_flight.step_name, execution, output);
        true
    }

    /// Worker reported failure: the job fails, no retry.
    pub fn fail(&mut self, execution: TaskExecution) -> bool {
        if self.job.in_flight.remove(&execution.id()).is_none() {
            return false;
        }
        let failure = execution.error.clone().unwrap_or_else(|| ExecutionFailure {
            message: format!("task {} failed", execution.id()),
            causes: Vec::new(),
        });
        self.job.executions.push(execution);
        self.job.mark_failed(failure, self.now);
        true
    }

    /// The dispatcher refused the task; the job fails.
    pub fn fail_dispatch(&mut self, task_id: TaskId, error: &DispatchError) {
        let failure = ExecutionFailure {
            message: error.to_string(),
            causes: Vec::new(),
        };
        if let Some(InFlight { mut execution, .. }) = self.job.in_flight.remove(&task_id) {
            execution.fail(failure.clone(), self.now);
            self.job.executions.push(execution);
        }
        self.job.mark_failed(failure, self.now);
    }

    pub fn record_progress(&mut self, event: &ProgressEvent) -> bool {
        match self.job.in_flight.get_mut(&event.task_id) {
            Some(in_flight) => {
                in_flight.execution.set_progress(event.progress);
                self.job.updated_at = self.now;
                true
            }
            None => false,
        }
    }

    /// Interprets a control step that came back on the control channel.
    pub fn interpret(&mut self, execution: &TaskExecution) -> bool {
        let Some(InFlight {
            line,
            step_name,
            execution: mut own,
        }) = self.job.in_flight.remove(&execution.id())
        else {
            return false;
        };
        own.start(self.now);

        match plan(&own.task) {
            Ok(ControlPlan::Splice(tasks)) => {
                let steps = &mut self.job.lines[line].steps;
                for task in tasks.into_iter().rev() {
                    steps.push_front(task);
                }
                self.settle(line, step_name, own, Value::Null);
            }
            Ok(ControlPlan::Fan(children)) if children.is_empty() => {
                self.settle(line, step_name, own, Value::Array(Vec::new()));
            }
            Ok(ControlPlan::Fan(children)) => {
                let task_id = own.id();
                let pending = children.len();
                let base = self.job.lines[line].locals.clone();
                for (slot, (steps, extra)) in children.into_iter().enumerate() {
                    let mut locals = base.clone();
                    locals.extend(extra);
                    let mut child = Line::new(steps, locals);
                    child.parent = Some(ParentSlot {
                        line,
                        slot,
                        task_id,
                    });
                    self.job.lines.push(child);
                }
                let parent = &mut self.job.lines[line];
                parent.current = None;
                parent.join = Some(Join {
                    step_name,
                    execution: own,
                    pending,
                    results: vec![Value::Null; pending],
                });
            }
            Err(err) => {
                let failure = ExecutionFailure::from(&err);
                own.fail(failure.clone(), self.now);
                self.job.executions.push(own);
                self.job.mark_failed(failure, self.now);
            }
        }
        true
    }

    fn begin_step(&mut self, idx: usize, step: WorkflowTask) -> TaskExecution {
        let line = &self.job.lines[idx];
        let scopes = [&line.locals, &self.job.outputs, &self.job.inputs];
        // 制御ステップの入れ子タスクは子ライン側で解決する
        let deep = ControlKind::of(&step.task_type).is_none();
        let parameters = step
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), interpolate(v, &scopes, deep)))
            .collect();
        let parent_task = line.parent.map(|p| p.task_id);

        let task_id = self.ids.generate_task_id();
        let mut task = Task::new(step.task_type, task_id, parameters);
        if let Some(parent) = parent_task {
            task = task.with_parent(parent);
        }
        let execution = TaskExecution::new(task, self.job.job_id, self.job.workflow_id, self.now)
            .with_instance(self.job.instance_id)
            .with_execution_type(self.job.execution_type);

        self.job.lines[idx].current = Some(task_id);
        self.job.in_flight.insert(
            task_id,
            InFlight {
                line: idx,
                step_name: step.name,
                execution: execution.clone(),
            },
        );
        execution
    }

    /// Hands a finished child line's output to its parent. `true` when the join completed.
    fn join_child(&mut self, parent: ParentSlot, child: usize) -> bool {
        let output = std::mem::take(&mut self.job.lines[child].last_output);
        let Some(join) = self.job.lines[parent.line].join.as_mut() else {
            return false;
        };
        if join.execution.id() != parent.task_id {
            return false;
        }
        if let Some(result) = join.results.get_mut(parent.slot) {
            *result = output;
        }
        join.pending = join.pending.saturating_sub(1);
        if join.pending > 0 {
            return false;
        }

        let Some(join) = self.job.lines[parent.line].join.take() else {
            return false;
        };
        self.settle(
            parent.line,
            join.step_name,
            join.execution,
            Value::Array(join.results),
        );
        true
    }

    fn settle(&mut self, idx: usize, step_name: String, mut execution: TaskExecution, output: Value) {
        execution.complete(output.clone(), self.now);
        let line = &mut self.job.lines[idx];
        line.current = None;
        line.last_output = output.clone();
        if line.parent.is_some() {
            line.locals.insert(step_name, output);
        } else {
            self.job.outputs.insert(step_name, output);
        }
        self.job.executions.push(execution);
        self.job.updated_at = self.now;
    }
}

fn plan(task: &Task) -> Result<ControlPlan, TaskExecutionError> {
    let Some(kind) = ControlKind::of(task.task_type()) else {
        return Err(TaskExecutionError::unsupported_operation(
            task.task_type().as_str(),
        ));
    };
    match kind {
        ControlKind::Branch => {
            let value = task.parameters().get("value").cloned().unwrap_or(Value::Null);
            let cases: Vec<BranchCase> = task.optional("cases")?.unwrap_or_default();
            let tasks = match cases.into_iter().find(|case| keys_match(&case.key, &value)) {
                Some(case) => case.tasks,
                None => task.optional("default")?.unwrap_or_default(),
            };
            Ok(ControlPlan::Splice(tasks))
        }
        ControlKind::Each => {
            let items: Vec<Value> = task.required("items")?;
            let iteratee: WorkflowTask = task.required("iteratee")?;
            let item_var: String = task
                .optional("itemVar")?
                .unwrap_or_else(|| DEFAULT_ITEM_VAR.to_string());
            Ok(ControlPlan::Fan(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let mut locals = Map::new();
                        locals.insert(item_var.clone(), item);
                        locals.insert(ITEM_INDEX_VAR.to_string(), Value::from(index));
                        (vec![iteratee.clone()], locals)
                    })
                    .collect(),
            ))
        }
        ControlKind::Fork => {
            let branches: Vec<Vec<WorkflowTask>> = task.required("branches")?;
            Ok(ControlPlan::Fan(
                branches
                    .into_iter()
                    .map(|steps| (steps, Map::new()))
                    .collect(),
            ))
        }
    }
}

/// `1` matches `"1"`; otherwise plain equality.
fn keys_match(key: &Value, value: &Value) -> bool {
    fn text(v: &Value) -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
    key == value || text(key) == text(value)
}

fn interpolate(value: &Value, scopes: &[&Map<String, Value>], deep: bool) -> Value {
    match value {
        Value::String(s) => match reference(s) {
            Some(expr) => lookup(expr, scopes).unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(items) if deep => Value::Array(
            items
                .iter()
                .map(|item| interpolate(item, scopes, deep))
                .collect(),
        ),
        Value::Object(map) if deep => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, scopes, deep)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// `"${expr}"` -> `expr`. Only whole-string references are recognized.
fn reference(s: &str) -> Option<&str> {
    s.strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
        .filter(|expr| !expr.is_empty())
}

fn lookup(expr: &str, scopes: &[&Map<String, Value>]) -> Option<Value> {
    let mut path = expr.split('.');
    let head = path.next()?;
    let mut current = scopes.iter().find_map(|scope| scope.get(head))?;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, JobState, WorkflowId};
    use crate::ports::{SystemClock, UlidGenerator};
    use rstest::rstest;
    use serde_json::json;
    use ulid::Ulid;

    fn steps(value: Value) -> Vec<WorkflowTask> {
        serde_json::from_value(value).unwrap()
    }

    fn job(tasks: Value, inputs: Value) -> JobRecord {
        JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            WorkflowId::from_ulid(Ulid::new()),
            steps(tasks),
            inputs.as_object().cloned().unwrap_or_default(),
            Utc::now(),
        )
    }

    /// ワーカーの代わりに出力を付けて完了させる
    fn finish(mut execution: TaskExecution, output: Value) -> TaskExecution {
        execution.start(Utc::now());
        execution.complete(output, Utc::now());
        execution
    }

    struct Harness {
        job: JobRecord,
        ids: UlidGenerator<SystemClock>,
    }

    impl Harness {
        fn new(job: JobRecord) -> Self {
            Self {
                job,
                ids: UlidGenerator::new(SystemClock),
            }
        }

        fn step(&mut self) -> Progression<'_> {
            Progression::new(&mut self.job, &self.ids, Utc::now())
        }

        fn advance(&mut self) -> Vec<TaskExecution> {
            self.step().advance()
        }

        fn complete(&mut self, execution: TaskExecution, output: Value) -> Vec<TaskExecution> {
            assert!(self.step().complete(finish(execution, output)));
            self.advance()
        }

        fn interpret(&mut self, execution: &TaskExecution) -> Vec<TaskExecution> {
            assert!(self.step().interpret(execution));
            self.advance()
        }
    }

    fn single(mut executions: Vec<TaskExecution>) -> TaskExecution {
        assert_eq!(executions.len(), 1, "expected exactly one dispatch");
        executions.remove(0)
    }

    #[test]
    fn steps_run_sequentially_and_complete_the_job() {
        let mut h = Harness::new(job(
            json!([
                { "name": "a", "type": "echo" },
                { "name": "b", "type": "echo" }
            ]),
            json!({}),
        ));

        let a = single(h.advance());
        assert_eq!(a.task.task_type().as_str(), "echo");
        let b = single(h.complete(a, json!(1)));
        assert!(h.complete(b, json!(2)).is_empty());

        assert_eq!(h.job.state, JobState::Completed);
        assert_eq!(h.job.outputs["a"], json!(1));
        assert_eq!(h.job.outputs["b"], json!(2));
        assert_eq!(h.job.executions.len(), 2);
    }

    #[test]
    fn empty_workflow_completes_immediately() {
        let mut h = Harness::new(job(json!([]), json!({})));
        assert!(h.advance().is_empty());
        assert_eq!(h.job.state, JobState::Completed);
    }

    #[test]
    fn references_resolve_against_outputs_and_inputs() {
        let mut h = Harness::new(job(
            json!([
                { "name": "parse", "type": "echo" },
                { "name": "use", "type": "echo", "parameters": {
                    "key": "${parse.key}",
                    "nested": ["${who}", "literal ${who}"],
                    "missing": "${nope}"
                } }
            ]),
            json!({ "who": "world" }),
        ));

        let parse = single(h.advance());
        let used = single(h.complete(parse, json!({ "key": 3 })));

        let params = used.task.parameters();
        assert_eq!(params["key"], json!(3));
        assert_eq!(params["nested"], json!(["world", "literal ${who}"]));
        assert_eq!(params["missing"], Value::Null);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut h = Harness::new(job(json!([{ "name": "a", "type": "echo" }]), json!({})));
        let a = single(h.advance());
        let duplicate = a.clone();

        h.complete(a, json!(1));
        assert!(!h.step().complete(finish(duplicate, json!(2))));

        assert_eq!(h.job.outputs["a"], json!(1));
        assert_eq!(h.job.executions.len(), 1);
    }

    #[rstest]
    #[case::matching_case(json!("b"), "second")]
    #[case::number_matches_string_key(json!(1), "first")]
    #[case::falls_back_to_default(json!("zzz"), "fallback")]
    fn branch_splices_the_selected_tasks(#[case] value: Value, #[case] expected: &str) {
        let mut h = Harness::new(job(
            json!([
                { "name": "choose", "type": "branch", "parameters": {
                    "value": value,
                    "cases": [
                        { "key": "1", "tasks": [{ "name": "first", "type": "echo" }] },
                        { "key": "b", "tasks": [{ "name": "second", "type": "echo" }] }
                    ],
                    "default": [{ "name": "fallback", "type": "echo" }]
                } },
                { "name": "after", "type": "echo" }
            ]),
            json!({}),
        ));

        let choose = single(h.advance());
        let chosen = single(h.interpret(&choose));
        let chosen_name = h.job.in_flight[&chosen.id()].step_name.clone();
        assert_eq!(chosen_name, expected);

        let after = single(h.complete(chosen, json!("x")));
        assert_eq!(h.job.in_flight[&after.id()].step_name, "after");
        assert!(h.complete(after, json!("y")).is_empty());
        assert_eq!(h.job.state, JobState::Completed);
        assert_eq!(h.job.outputs["choose"], Value::Null);
    }

    #[test]
    fn each_fans_out_and_joins_in_item_order() {
        let mut h = Harness::new(job(
            json!([
                { "name": "loop", "type": "each", "parameters": {
                    "items": "${list}",
                    "itemVar": "n",
                    "iteratee": { "name": "double", "type": "echo",
                                  "parameters": { "value": "${n}", "index": "${itemIndex}" } }
                } },
                { "name": "sum", "type": "echo", "parameters": { "values": "${loop}" } }
            ]),
            json!({ "list": [10, 20, 30] }),
        ));

        let each = single(h.advance());
        let mut children = h.interpret(&each);
        assert_eq!(children.len(), 3);
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.task.parameters()["index"], json!(i));
            assert_eq!(child.task.parent_id(), Some(each.id()));
        }

        // 逆順に完了させても結果は item 順
        let third = children.pop().unwrap();
        let second = children.pop().unwrap();
        let first = children.pop().unwrap();
        assert!(h.complete(third, json!(60)).is_empty());
        assert!(h.complete(first, json!(20)).is_empty());
        let sum = single(h.complete(second, json!(40)));

        assert_eq!(sum.task.parameters()["values"], json!([20, 40, 60]));
        assert_eq!(h.job.outputs["loop"], json!([20, 40, 60]));
    }

    #[test]
    fn each_over_empty_items_outputs_empty_array() {
        let mut h = Harness::new(job(
            json!([{ "name": "loop", "type": "loop", "parameters": {
                "items": [],
                "iteratee": { "name": "x", "type": "echo" }
            } }]),
            json!({}),
        ));

        let each = single(h.advance());
        assert!(h.interpret(&each).is_empty());
        assert_eq!(h.job.state, JobState::Completed);
        assert_eq!(h.job.outputs["loop"], json!([]));
    }

    #[test]
    fn fork_joins_last_output_of_each_branch() {
        let mut h = Harness::new(job(
            json!([{ "name": "split", "type": "fork", "parameters": { "branches": [
                [{ "name": "l1", "type": "echo" }, { "name": "l2", "type": "echo", "parameters": { "v": "${l1}" } }],
                [{ "name": "r1", "type": "echo" }]
            ] } }]),
            json!({}),
        ));

        let fork = single(h.advance());
        let started = h.interpret(&fork);
        assert_eq!(started.len(), 2);
        let (l1, r1) = (started[0].clone(), started[1].clone());

        assert!(h.complete(r1, json!("right")).is_empty());
        let l2 = single(h.complete(l1, json!("left-1")));
        assert_eq!(l2.task.parameters()["v"], json!("left-1"));
        assert!(h.complete(l2, json!("left-2")).is_empty());

        assert_eq!(h.job.state, JobState::Completed);
        assert_eq!(h.job.outputs["split"], json!(["left-2", "right"]));
        assert!(!h.job.outputs.contains_key("l1"));
    }

    #[test]
    fn malformed_control_step_fails_the_job() {
        let mut h = Harness::new(job(
            json!([{ "name": "loop", "type": "each", "parameters": { "items": "not-a-list" } }]),
            json!({}),
        ));

        let each = single(h.advance());
        assert!(h.interpret(&each).is_empty());

        assert_eq!(h.job.state, JobState::Failed);
        assert!(h.job.error.as_ref().unwrap().message.contains("items"));
    }

    #[test]
    fn failure_stops_progression() {
        let mut h = Harness::new(job(
            json!([{ "name": "a", "type": "echo" }, { "name": "b", "type": "echo" }]),
            json!({}),
        ));
        let mut a = single(h.advance());
        a.fail(
            ExecutionFailure {
                message: "boom".to_string(),
                causes: vec![],
            },
            Utc::now(),
        );

        assert!(h.step().fail(a));
        assert!(h.advance().is_empty());
        assert_eq!(h.job.state, JobState::Failed);
        assert_eq!(h.job.error.as_ref().unwrap().message, "boom");
    }
}
