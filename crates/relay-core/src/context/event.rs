//! Event capability - 進捗通知
//!
//! job に紐づかない呼び出し（設計時の実行など）では `Disabled` になります。
//! `publish_progress` はどちらの場合もエラーを返しません。

use std::sync::Arc;

use crate::domain::events::ProgressEvent;
use crate::domain::ids::{JobId, TaskId};
use crate::ports::{Clock, EventSink};

use super::ContextParams;

pub enum Event {
    Active {
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        job_id: JobId,
        task_id: TaskId,
    },
    Disabled,
}

impl Event {
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>, params: &ContextParams) -> Self {
        match (params.job_id, params.task_id) {
            (Some(job_id), Some(task_id)) => Event::Active {
                sink,
                clock,
                job_id,
                task_id,
            },
            _ => Event::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Event::Active { .. })
    }

    /// Reports `percent` (clamped to 0..=100) for the current invocation.
    pub async fn publish_progress(&self, percent: u8) {
        let Event::Active {
            sink,
            clock,
            job_id,
            task_id,
        } = self
        else {
            return;
        };

        let event = ProgressEvent {
            job_id: *job_id,
            task_id: *task_id,
            progress: percent.min(100),
            emitted_at: clock.now(),
        };
        if let Err(e) = sink.publish(event).await {
            tracing::warn!(%job_id, %task_id, error = %e, "progress event dropped");
        }
    }
}
